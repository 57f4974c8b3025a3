use anyhow::Context;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{CertificateStatus, DocumentFormat, EligibleResult};
use crate::store::eligible_from_row;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Fields of one assessment result as it arrives from the grading side.
struct ResultInput<'a> {
    full_name: &'a str,
    enrollment_no: &'a str,
    course_name: &'a str,
    course_duration: &'a str,
    assessment_name: &'a str,
    total_marks: i32,
    passing_marks: i32,
    marks_obtained: i32,
    status: &'a str,
    completed_at: DateTime<Utc>,
    source_key: &'a str,
}

/// Upserts the course, student and assessment, then inserts the result.
/// Returns whether a new result row was written.
async fn upsert_result(pool: &PgPool, input: &ResultInput<'_>) -> anyhow::Result<bool> {
    if !matches!(input.status, "pass" | "fail") {
        anyhow::bail!(
            "result {} has status '{}', expected 'pass' or 'fail'",
            input.source_key,
            input.status
        );
    }

    let course_id: i64 = sqlx::query(
        r#"
        INSERT INTO certificate_issuance.courses (name, duration)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET duration = EXCLUDED.duration
        RETURNING id
        "#,
    )
    .bind(input.course_name)
    .bind(input.course_duration)
    .fetch_one(pool)
    .await?
    .get("id");

    let student_id: i64 = sqlx::query(
        r#"
        INSERT INTO certificate_issuance.students (full_name, enrollment_no, course_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (enrollment_no) DO UPDATE
        SET full_name = EXCLUDED.full_name, course_id = EXCLUDED.course_id
        RETURNING id
        "#,
    )
    .bind(input.full_name)
    .bind(input.enrollment_no)
    .bind(course_id)
    .fetch_one(pool)
    .await?
    .get("id");

    let assessment_id: i64 = sqlx::query(
        r#"
        INSERT INTO certificate_issuance.assessments
        (course_id, name, total_marks, passing_marks)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (course_id, name) DO UPDATE
        SET total_marks = EXCLUDED.total_marks, passing_marks = EXCLUDED.passing_marks
        RETURNING id
        "#,
    )
    .bind(course_id)
    .bind(input.assessment_name)
    .bind(input.total_marks)
    .bind(input.passing_marks)
    .fetch_one(pool)
    .await?
    .get("id");

    let result = sqlx::query(
        r#"
        INSERT INTO certificate_issuance.assessment_results
        (student_id, assessment_id, marks_obtained, total_marks, status, completed_at, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(student_id)
    .bind(assessment_id)
    .bind(input.marks_obtained)
    .bind(input.total_marks)
    .bind(input.status)
    .bind(input.completed_at)
    .bind(input.source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let results = vec![
        ("seed-001", "Avery Lee", "GS-2026-0001", 88, "pass", (2026, 2, 2)),
        ("seed-002", "Jules Moreno", "GS-2026-0002", 96, "pass", (2026, 1, 30)),
        ("seed-003", "Kiara Patel", "GS-2026-0003", 31, "fail", (2026, 1, 28)),
        ("seed-004", "Noor Haddad", "GS-2026-0004", 61, "pass", (2026, 2, 4)),
    ];

    let mut inserted = 0usize;
    for (source_key, name, enrollment_no, marks, status, (year, month, day)) in results {
        let completed_at = Utc
            .with_ymd_and_hms(year, month, day, 10, 0, 0)
            .single()
            .context("invalid seed timestamp")?;

        let input = ResultInput {
            full_name: name,
            enrollment_no,
            course_name: "Applied Data Literacy",
            course_duration: "12 weeks",
            assessment_name: "Final Exam",
            total_marks: 100,
            passing_marks: 40,
            marks_obtained: marks,
            status,
            completed_at,
            source_key,
        };
        if upsert_result(pool, &input).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        enrollment_no: String,
        course_name: String,
        course_duration: String,
        assessment_name: String,
        total_marks: i32,
        passing_marks: i32,
        marks_obtained: i32,
        status: String,
        completed_at: DateTime<Utc>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV record {}", line + 1))?;
        let source_key = row
            .source_key
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let input = ResultInput {
            full_name: &row.full_name,
            enrollment_no: &row.enrollment_no,
            course_name: &row.course_name,
            course_duration: &row.course_duration,
            assessment_name: &row.assessment_name,
            total_marks: row.total_marks,
            passing_marks: row.passing_marks,
            marks_obtained: row.marks_obtained,
            status: row.status.trim(),
            completed_at: row.completed_at,
            source_key: &source_key,
        };

        if upsert_result(pool, &input).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// A persisted certificate joined back to the result it certifies.
#[derive(Debug, Clone)]
pub struct StoredCertificate {
    pub certificate_number: String,
    pub issued_date: NaiveDate,
    pub artifact_path: String,
    pub qr_path: Option<String>,
    pub document_format: DocumentFormat,
    pub status: CertificateStatus,
    pub result: EligibleResult,
}

pub async fn fetch_certificate(
    pool: &PgPool,
    certificate_number: &str,
) -> anyhow::Result<Option<StoredCertificate>> {
    let row = sqlx::query(
        r#"
        SELECT cert.certificate_number, cert.issued_date, cert.artifact_path, cert.qr_path,
               cert.document_format, cert.status,
               r.id AS result_id, r.student_id, s.full_name, s.enrollment_no,
               c.name AS course_name, c.duration AS course_duration,
               a.name AS assessment_name, r.marks_obtained, r.total_marks,
               a.passing_marks, r.completed_at
        FROM certificate_issuance.certificates cert
        JOIN certificate_issuance.assessment_results r ON r.id = cert.result_id
        JOIN certificate_issuance.students s ON s.id = r.student_id
        JOIN certificate_issuance.assessments a ON a.id = r.assessment_id
        JOIN certificate_issuance.courses c ON c.id = a.course_id
        WHERE cert.certificate_number = $1
        "#,
    )
    .bind(certificate_number)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let format: String = row.get("document_format");
    let status: String = row.get("status");

    Ok(Some(StoredCertificate {
        certificate_number: row.get("certificate_number"),
        issued_date: row.get("issued_date"),
        artifact_path: row.get("artifact_path"),
        qr_path: row.get("qr_path"),
        document_format: DocumentFormat::parse(&format)
            .with_context(|| format!("unknown document format '{format}'"))?,
        status: CertificateStatus::parse(&status)
            .with_context(|| format!("unknown certificate status '{status}'"))?,
        result: eligible_from_row(&row)?,
    }))
}
