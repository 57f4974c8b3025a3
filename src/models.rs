use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A passed assessment result with no certificate yet, joined with the display
/// fields the pipeline needs downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibleResult {
    pub result_id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub enrollment_no: String,
    pub course_name: String,
    pub course_duration: String,
    pub assessment_name: String,
    pub marks_obtained: i32,
    pub total_marks: i32,
    pub passing_marks: i32,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Generated,
    /// Reserved for the distribution workflow; never written by the issuer.
    Issued,
}

impl CertificateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Issued => "issued",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "generated" => Some(Self::Generated),
            "issued" => Some(Self::Issued),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Html,
}

impl DocumentFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Html => "html",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pdf" => Some(Self::Pdf),
            "html" => Some(Self::Html),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

/// The single row written per issuance.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCertificate {
    pub student_id: i64,
    pub result_id: i64,
    pub certificate_number: String,
    pub issued_date: NaiveDate,
    pub artifact_path: PathBuf,
    pub qr_path: Option<PathBuf>,
    pub document_format: DocumentFormat,
    pub status: CertificateStatus,
}

/// Per-item pipeline stage. An item that fails is reported with the last stage
/// it reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Numbered,
    PayloadBuilt,
    QrAttempted,
    DocumentAttempted,
    Persisted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Numbered => "numbered",
            Self::PayloadBuilt => "payload_built",
            Self::QrAttempted => "qr_attempted",
            Self::DocumentAttempted => "document_attempted",
            Self::Persisted => "persisted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IssuedCertificate {
    pub result_id: i64,
    pub student_id: i64,
    pub certificate_number: String,
    pub artifact_path: PathBuf,
    pub qr_missing: bool,
    pub document_degraded: bool,
}

impl IssuedCertificate {
    pub fn is_degraded(&self) -> bool {
        self.qr_missing || self.document_degraded
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub result_id: i64,
    pub student_id: i64,
    pub stage: Stage,
    pub cause: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: uuid::Uuid,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub issued: Vec<IssuedCertificate>,
    pub duplicates: Vec<i64>,
    pub errors: Vec<ItemFailure>,
}

impl RunSummary {
    pub fn new(run_id: uuid::Uuid) -> Self {
        Self {
            run_id,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            issued: Vec::new(),
            duplicates: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn degraded(&self) -> impl Iterator<Item = &IssuedCertificate> {
        self.issued.iter().filter(|cert| cert.is_degraded())
    }
}
