//! Canonical verification payload encoded into the certificate QR code.

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::ItemError;
use crate::grade;
use crate::models::EligibleResult;

/// `verify` rebuilds the payload from stored rows plus the configured
/// `verify_url_template`, so the template is part of the encoding. Changing
/// the field set, the formatting or the template requires a new version.
pub const PAYLOAD_VERSION: u8 = 1;

/// Field order is part of the encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationPayload {
    pub v: u8,
    pub certificate_number: String,
    pub student_name: String,
    pub course: String,
    pub enrollment_no: String,
    pub grade: String,
    pub percentage: String,
    pub issue_date: String,
    pub verify_url: String,
}

impl VerificationPayload {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub fn verify_url(template: &str, certificate_number: &str) -> String {
    template.replace("{number}", &urlencoding::encode(certificate_number))
}

pub fn build(
    result: &EligibleResult,
    certificate_number: &str,
    issue_date: NaiveDate,
    verify_url_template: &str,
) -> Result<VerificationPayload, ItemError> {
    let percentage = grade::percentage(result.marks_obtained, result.total_marks).ok_or_else(
        || {
            ItemError::InvalidResult(format!(
                "marks {}/{} cannot be converted to a percentage",
                result.marks_obtained, result.total_marks
            ))
        },
    )?;

    Ok(VerificationPayload {
        v: PAYLOAD_VERSION,
        certificate_number: certificate_number.to_string(),
        student_name: result.student_name.clone(),
        course: result.course_name.clone(),
        enrollment_no: result.enrollment_no.clone(),
        grade: grade::grade(percentage).to_string(),
        percentage: grade::format_percentage(percentage),
        issue_date: issue_date.format("%Y-%m-%d").to_string(),
        verify_url: verify_url(verify_url_template, certificate_number),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    const TEMPLATE: &str = "https://certificates.example.edu/verify?number={number}";

    pub(crate) fn sample_result(result_id: i64, student_id: i64, marks: i32) -> EligibleResult {
        EligibleResult {
            result_id,
            student_id,
            student_name: "Avery Lee".to_string(),
            enrollment_no: format!("ENR-{student_id:04}"),
            course_name: "Applied Data Literacy".to_string(),
            course_duration: "12 weeks".to_string(),
            assessment_name: "Final Exam".to_string(),
            marks_obtained: marks,
            total_marks: 100,
            passing_marks: 40,
            completed_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
                + chrono::Duration::minutes(result_id),
        }
    }

    #[test]
    fn payload_embeds_grade_and_two_decimal_percentage() {
        let result = sample_result(7, 42, 88);
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let payload = build(&result, "CERT2026", date, TEMPLATE).unwrap();

        assert_eq!(
            payload,
            VerificationPayload {
                v: 1,
                certificate_number: "CERT2026".to_string(),
                student_name: "Avery Lee".to_string(),
                course: "Applied Data Literacy".to_string(),
                enrollment_no: "ENR-0042".to_string(),
                grade: "A".to_string(),
                percentage: "88.00".to_string(),
                issue_date: "2026-10-19".to_string(),
                verify_url: "https://certificates.example.edu/verify?number=CERT2026".to_string(),
            }
        );
    }

    #[test]
    fn independent_constructions_are_byte_identical() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let first = build(&sample_result(7, 42, 88), "N-1", date, TEMPLATE)
            .unwrap()
            .encode()
            .unwrap();
        let second = build(&sample_result(7, 42, 88), "N-1", date, TEMPLATE)
            .unwrap()
            .encode()
            .unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with(r#"{"v":1,"certificate_number":"N-1","#));
    }

    #[test]
    fn verify_url_escapes_the_number() {
        assert_eq!(
            verify_url("https://x.test/v/{number}", "A B/1"),
            "https://x.test/v/A%20B%2F1"
        );
    }

    #[test]
    fn zero_total_marks_is_an_invalid_result() {
        let mut result = sample_result(1, 1, 10);
        result.total_marks = 0;
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert!(matches!(
            build(&result, "N", date, TEMPLATE),
            Err(ItemError::InvalidResult(_))
        ));
    }

    #[test]
    fn verify_url_template_changes_the_encoding() {
        let result = sample_result(7, 42, 88);
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let current = build(&result, "N-1", date, TEMPLATE).unwrap().encode().unwrap();
        let moved = build(&result, "N-1", date, "https://verify.example.org/{number}")
            .unwrap()
            .encode()
            .unwrap();

        assert_ne!(current, moved);
        assert!(moved.ends_with(r#""verify_url":"https://verify.example.org/N-1"}"#));
    }
}
