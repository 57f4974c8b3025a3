use std::fmt::Write;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;

use crate::models::RunSummary;

pub fn summary_line(summary: &RunSummary) -> String {
    format!(
        "Attempted {}, issued {} ({} degraded), failed {}, already issued elsewhere {}.",
        summary.attempted,
        summary.succeeded,
        summary.degraded().count(),
        summary.failed,
        summary.duplicates.len()
    )
}

pub fn build_report(issue_date: NaiveDate, summary: &RunSummary) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Certificate Issuance Report");
    let _ = writeln!(
        output,
        "Run {} for issue date {}",
        summary.run_id, issue_date
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "{}", summary_line(summary));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Issued Certificates");

    if summary.issued.is_empty() {
        let _ = writeln!(output, "No certificates issued in this run.");
    } else {
        for cert in &summary.issued {
            let mut notes = Vec::new();
            if cert.qr_missing {
                notes.push("no QR code");
            }
            if cert.document_degraded {
                notes.push("HTML only");
            }
            let suffix = if notes.is_empty() {
                String::new()
            } else {
                format!(" ({})", notes.join(", "))
            };
            let _ = writeln!(
                output,
                "- {} for result {} (student {}) at {}{}",
                cert.certificate_number,
                cert.result_id,
                cert.student_id,
                cert.artifact_path.display(),
                suffix
            );
        }
    }

    if !summary.duplicates.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Already Issued By Another Run");
        for result_id in &summary.duplicates {
            let _ = writeln!(output, "- result {result_id}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Failures");

    if summary.errors.is_empty() {
        let _ = writeln!(output, "No failures.");
    } else {
        for failure in &summary.errors {
            let _ = writeln!(
                output,
                "- result {} (student {}) at {}: {}",
                failure.result_id, failure.student_id, failure.stage, failure.cause
            );
        }
    }

    output
}

pub fn write_report(path: &Path, issue_date: NaiveDate, summary: &RunSummary) -> anyhow::Result<()> {
    std::fs::write(path, build_report(issue_date, summary))
        .with_context(|| format!("failed to write report to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IssuedCertificate, ItemFailure, Stage};
    use std::path::PathBuf;

    fn summary() -> RunSummary {
        let mut summary = RunSummary::new(uuid::Uuid::nil());
        summary.attempted = 3;
        summary.succeeded = 1;
        summary.failed = 1;
        summary.issued.push(IssuedCertificate {
            result_id: 1,
            student_id: 10,
            certificate_number: "CERT1".to_string(),
            artifact_path: PathBuf::from("storage/certificates/CERT1.html"),
            qr_missing: true,
            document_degraded: true,
        });
        summary.duplicates.push(2);
        summary.errors.push(ItemFailure {
            result_id: 3,
            student_id: 12,
            stage: Stage::DocumentAttempted,
            cause: "storage error: disk full".to_string(),
        });
        summary
    }

    #[test]
    fn summary_line_counts_every_outcome() {
        assert_eq!(
            summary_line(&summary()),
            "Attempted 3, issued 1 (1 degraded), failed 1, already issued elsewhere 1."
        );
    }

    #[test]
    fn report_lists_degraded_items_and_failures() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let report = build_report(date, &summary());

        assert!(report.contains("- CERT1 for result 1 (student 10) at storage/certificates/CERT1.html (no QR code, HTML only)"));
        assert!(report.contains("## Already Issued By Another Run\n- result 2"));
        assert!(report.contains("- result 3 (student 12) at document_attempted: storage error: disk full"));
    }

    #[test]
    fn empty_run_reports_no_activity() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let report = build_report(date, &RunSummary::new(uuid::Uuid::nil()));

        assert!(report.contains("No certificates issued in this run."));
        assert!(report.contains("No failures."));
        assert!(!report.contains("Already Issued"));
    }

    #[test]
    fn unwritable_report_path_is_reported_with_its_location() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let written = dir.path().join("report.md");
        write_report(&written, date, &summary()).unwrap();
        assert!(std::fs::read_to_string(&written).unwrap().contains("CERT1"));

        let missing = dir.path().join("no-such-dir").join("report.md");
        let err = write_report(&missing, date, &summary()).unwrap_err();
        assert!(format!("{err:#}").starts_with(&format!(
            "failed to write report to {}",
            missing.display()
        )));
    }
}
