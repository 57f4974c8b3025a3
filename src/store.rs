use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::error::{PersistError, ScanError};
use crate::models::{EligibleResult, NewCertificate};

const RESULT_ID_CONSTRAINT: &str = "certificates_result_id_key";
const NUMBER_CONSTRAINT: &str = "certificates_certificate_number_key";

#[async_trait]
pub trait IssuanceStore: Send + Sync {
    /// Passed results without a certificate, oldest completion first.
    async fn scan(&self) -> Result<Vec<EligibleResult>, ScanError>;

    /// Inserts exactly one row or rejects it.
    async fn persist(&self, certificate: &NewCertificate) -> Result<(), PersistError>;
}

pub struct PgIssuanceStore {
    pool: PgPool,
}

impl PgIssuanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IssuanceStore for PgIssuanceStore {
    async fn scan(&self) -> Result<Vec<EligibleResult>, ScanError> {
        let rows = sqlx::query(
            r#"
            SELECT r.id AS result_id, r.student_id, s.full_name, s.enrollment_no,
                   c.name AS course_name, c.duration AS course_duration,
                   a.name AS assessment_name, r.marks_obtained, r.total_marks,
                   a.passing_marks, r.completed_at
            FROM certificate_issuance.assessment_results r
            JOIN certificate_issuance.students s ON s.id = r.student_id
            JOIN certificate_issuance.assessments a ON a.id = r.assessment_id
            JOIN certificate_issuance.courses c ON c.id = a.course_id
            WHERE r.status = 'pass'
              AND NOT EXISTS (
                  SELECT 1 FROM certificate_issuance.certificates cert
                  WHERE cert.result_id = r.id
              )
            ORDER BY r.completed_at ASC, r.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|err| ScanError(err.to_string()))?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            results.push(eligible_from_row(&row).map_err(|err| ScanError(err.to_string()))?);
        }
        Ok(results)
    }

    async fn persist(&self, certificate: &NewCertificate) -> Result<(), PersistError> {
        sqlx::query(
            r#"
            INSERT INTO certificate_issuance.certificates
            (student_id, result_id, certificate_number, issued_date,
             artifact_path, qr_path, document_format, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(certificate.student_id)
        .bind(certificate.result_id)
        .bind(&certificate.certificate_number)
        .bind(certificate.issued_date)
        .bind(certificate.artifact_path.to_string_lossy().into_owned())
        .bind(
            certificate
                .qr_path
                .as_ref()
                .map(|path| path.to_string_lossy().into_owned()),
        )
        .bind(certificate.document_format.as_str())
        .bind(certificate.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|err| classify_insert_error(err, certificate))?;

        Ok(())
    }
}

pub(crate) fn eligible_from_row(row: &sqlx::postgres::PgRow) -> Result<EligibleResult, sqlx::Error> {
    Ok(EligibleResult {
        result_id: row.try_get("result_id")?,
        student_id: row.try_get("student_id")?,
        student_name: row.try_get("full_name")?,
        enrollment_no: row.try_get("enrollment_no")?,
        course_name: row.try_get("course_name")?,
        course_duration: row.try_get("course_duration")?,
        assessment_name: row.try_get("assessment_name")?,
        marks_obtained: row.try_get("marks_obtained")?,
        total_marks: row.try_get("total_marks")?,
        passing_marks: row.try_get("passing_marks")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn classify_insert_error(err: sqlx::Error, certificate: &NewCertificate) -> PersistError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return classify_unique_violation(db_err.constraint(), certificate, err.to_string());
        }
    }
    PersistError::Storage(err.to_string())
}

fn classify_unique_violation(
    constraint: Option<&str>,
    certificate: &NewCertificate,
    message: String,
) -> PersistError {
    match constraint {
        Some(RESULT_ID_CONSTRAINT) => PersistError::Duplicate {
            result_id: certificate.result_id,
        },
        Some(NUMBER_CONSTRAINT) => {
            PersistError::NumberCollision(certificate.certificate_number.clone())
        }
        _ => PersistError::Storage(message),
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-process store with the same uniqueness rules as the Postgres schema.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub(crate) struct MemoryStore {
        results: Mutex<Vec<EligibleResult>>,
        certificates: Mutex<HashMap<i64, NewCertificate>>,
        fail_scan: bool,
        fail_persist_for: Option<i64>,
    }

    impl MemoryStore {
        pub(crate) fn with_results(results: Vec<EligibleResult>) -> Self {
            Self {
                results: Mutex::new(results),
                ..Self::default()
            }
        }

        pub(crate) fn failing_scan() -> Self {
            Self {
                fail_scan: true,
                ..Self::default()
            }
        }

        pub(crate) fn failing_persist_for(mut self, result_id: i64) -> Self {
            self.fail_persist_for = Some(result_id);
            self
        }

        pub(crate) fn certificates(&self) -> Vec<NewCertificate> {
            let mut rows: Vec<_> = self.certificates.lock().unwrap().values().cloned().collect();
            rows.sort_by_key(|row| row.result_id);
            rows
        }

        /// Results as a scan would have seen them before any certificate existed.
        pub(crate) fn all_results(&self) -> Vec<EligibleResult> {
            self.results.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IssuanceStore for MemoryStore {
        async fn scan(&self) -> Result<Vec<EligibleResult>, ScanError> {
            if self.fail_scan {
                return Err(ScanError("relation does not exist".to_string()));
            }
            let issued = self.certificates.lock().unwrap();
            let mut pending: Vec<_> = self
                .results
                .lock()
                .unwrap()
                .iter()
                .filter(|result| !issued.contains_key(&result.result_id))
                .cloned()
                .collect();
            pending.sort_by_key(|result| (result.completed_at, result.result_id));
            Ok(pending)
        }

        async fn persist(&self, certificate: &NewCertificate) -> Result<(), PersistError> {
            if self.fail_persist_for == Some(certificate.result_id) {
                return Err(PersistError::Storage("disk full".to_string()));
            }
            let mut issued = self.certificates.lock().unwrap();
            if issued.contains_key(&certificate.result_id) {
                return Err(PersistError::Duplicate {
                    result_id: certificate.result_id,
                });
            }
            if issued
                .values()
                .any(|row| row.certificate_number == certificate.certificate_number)
            {
                return Err(PersistError::NumberCollision(
                    certificate.certificate_number.clone(),
                ));
            }
            issued.insert(certificate.result_id, certificate.clone());
            Ok(())
        }
    }

    /// Replays a fixed scan, as a run that scanned before a concurrent run
    /// persisted would.
    pub(crate) struct StaleScan<'a> {
        pub(crate) inner: &'a MemoryStore,
        pub(crate) snapshot: Vec<EligibleResult>,
    }

    #[async_trait]
    impl IssuanceStore for StaleScan<'_> {
        async fn scan(&self) -> Result<Vec<EligibleResult>, ScanError> {
            Ok(self.snapshot.clone())
        }

        async fn persist(&self, certificate: &NewCertificate) -> Result<(), PersistError> {
            self.inner.persist(certificate).await
        }
    }
}
