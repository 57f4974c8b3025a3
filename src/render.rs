use std::fmt::Write;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use base64::Engine;
use chrono::NaiveDate;

use crate::config::{RenderConfig, StorageConfig};
use crate::error::TransformUnavailable;
use crate::models::{DocumentFormat, EligibleResult};

/// Everything the certificate page shows.
#[derive(Debug, Clone, Copy)]
pub struct DocumentInput<'a> {
    pub result: &'a EligibleResult,
    pub certificate_number: &'a str,
    pub grade: &'a str,
    pub percentage: &'a str,
    pub issue_date: NaiveDate,
    pub qr_png: Option<&'a [u8]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntermediateArtifact {
    pub html: String,
}

#[derive(Debug)]
pub struct FinalArtifact {
    pub path: PathBuf,
    pub format: DocumentFormat,
    /// Set when the PDF could not be produced and the HTML was kept instead.
    pub degraded: Option<TransformUnavailable>,
}

/// External HTML to PDF converter with a fixed page layout.
#[derive(Debug, Clone)]
pub struct ExternalTransformer {
    executable: PathBuf,
    layout_args: Vec<String>,
    timeout_secs: u64,
}

impl ExternalTransformer {
    pub fn new(executable: PathBuf, config: &RenderConfig) -> Self {
        let margin = format!("{}mm", config.margin_mm);
        let mut layout_args = vec![
            "--quiet".to_string(),
            "--enable-local-file-access".to_string(),
            "--page-size".to_string(),
            config.page_size.clone(),
            "--orientation".to_string(),
            config.orientation.clone(),
        ];
        for side in ["top", "bottom", "left", "right"] {
            layout_args.push(format!("--margin-{side}"));
            layout_args.push(margin.clone());
        }

        Self {
            executable,
            layout_args,
            timeout_secs: config.timeout_secs,
        }
    }

    /// Converts `html` into `output`. The input temp file lives in `work_dir`
    /// and is removed on every return path.
    async fn convert(
        &self,
        html: &str,
        work_dir: &Path,
        output: &Path,
    ) -> Result<(), TransformUnavailable> {
        let mut input = tempfile::Builder::new()
            .prefix("certificate-")
            .suffix(".html")
            .tempfile_in(work_dir)?;
        input.write_all(html.as_bytes())?;
        input.flush()?;

        let mut command = tokio::process::Command::new(&self.executable);
        command
            .args(&self.layout_args)
            .arg(input.path())
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let outcome = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            command.output(),
        )
        .await;

        let process = match outcome {
            Err(_) => return Err(TransformUnavailable::Timeout(self.timeout_secs)),
            Ok(result) => result?,
        };

        if !process.status.success() {
            return Err(TransformUnavailable::Failed {
                status: process.status.to_string(),
                stderr: String::from_utf8_lossy(&process.stderr).trim().to_string(),
            });
        }

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(TransformUnavailable::NoOutput),
        }
    }
}

/// Transformer capability, detected once per run.
#[derive(Debug, Clone)]
pub enum Transformer {
    Available(ExternalTransformer),
    Unavailable,
}

impl Transformer {
    pub fn detect(config: &RenderConfig) -> Self {
        match which::which(&config.transformer) {
            Ok(executable) => {
                tracing::info!(path = %executable.display(), "document transformer found");
                Self::Available(ExternalTransformer::new(executable, config))
            }
            Err(err) => {
                tracing::warn!(
                    transformer = %config.transformer,
                    error = %err,
                    "document transformer not found, certificates will stay HTML"
                );
                Self::Unavailable
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

pub struct ArtifactRenderer {
    certificate_dir: PathBuf,
    qr_dir: PathBuf,
    work_dir: PathBuf,
    transformer: Transformer,
}

impl ArtifactRenderer {
    /// Creates the output directories if needed.
    pub fn new(storage: &StorageConfig, transformer: Transformer) -> std::io::Result<Self> {
        let work_dir = storage.work_dir();
        for dir in [&storage.certificate_dir, &storage.qr_dir, &work_dir] {
            std::fs::create_dir_all(dir)?;
        }

        Ok(Self {
            certificate_dir: storage.certificate_dir.clone(),
            qr_dir: storage.qr_dir.clone(),
            work_dir,
            transformer,
        })
    }

    pub fn transformer(&self) -> &Transformer {
        &self.transformer
    }

    pub fn qr_path(&self, certificate_number: &str) -> PathBuf {
        self.qr_dir.join(format!("{certificate_number}.png"))
    }

    pub fn document_path(&self, certificate_number: &str, format: DocumentFormat) -> PathBuf {
        self.certificate_dir
            .join(format!("{certificate_number}.{}", format.extension()))
    }

    pub fn render_document(&self, input: &DocumentInput<'_>) -> IntermediateArtifact {
        IntermediateArtifact {
            html: certificate_html(input),
        }
    }

    /// Writes the final artifact. Only I/O failures writing the HTML fallback
    /// are errors; transformer problems degrade.
    pub async fn transform_document(
        &self,
        intermediate: &IntermediateArtifact,
        certificate_number: &str,
    ) -> std::io::Result<FinalArtifact> {
        let degraded = match &self.transformer {
            Transformer::Unavailable => TransformUnavailable::NotInstalled,
            Transformer::Available(transformer) => {
                let pdf_path = self.document_path(certificate_number, DocumentFormat::Pdf);
                match transformer
                    .convert(&intermediate.html, &self.work_dir, &pdf_path)
                    .await
                {
                    Ok(()) => {
                        return Ok(FinalArtifact {
                            path: pdf_path,
                            format: DocumentFormat::Pdf,
                            degraded: None,
                        });
                    }
                    Err(err) => {
                        remove_if_exists(&pdf_path).await;
                        err
                    }
                }
            }
        };

        let html_path = self.document_path(certificate_number, DocumentFormat::Html);
        tokio::fs::write(&html_path, &intermediate.html).await?;
        Ok(FinalArtifact {
            path: html_path,
            format: DocumentFormat::Html,
            degraded: Some(degraded),
        })
    }
}

async fn remove_if_exists(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "could not remove partial PDF");
        }
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn certificate_html(input: &DocumentInput<'_>) -> String {
    let result = input.result;
    let mut output = String::new();

    let _ = writeln!(output, "<!DOCTYPE html>");
    let _ = writeln!(output, "<html lang=\"en\">");
    let _ = writeln!(output, "<head>");
    let _ = writeln!(output, "<meta charset=\"utf-8\">");
    let _ = writeln!(
        output,
        "<title>Certificate {}</title>",
        escape_html(input.certificate_number)
    );
    let _ = writeln!(
        output,
        "<style>body{{font-family:serif;text-align:center;margin:0;padding:40px}}\
         .frame{{border:8px double #1f3a5f;padding:48px}}\
         .name{{font-size:36px;font-weight:bold}}\
         .meta{{font-size:14px;color:#444}}\
         .qr img{{width:140px;height:140px}}</style>"
    );
    let _ = writeln!(output, "</head>");
    let _ = writeln!(output, "<body><div class=\"frame\">");
    let _ = writeln!(output, "<h1>Certificate of Completion</h1>");
    let _ = writeln!(output, "<p>This is to certify that</p>");
    let _ = writeln!(
        output,
        "<p class=\"name\">{}</p>",
        escape_html(&result.student_name)
    );
    let _ = writeln!(
        output,
        "<p>Enrollment No. {}</p>",
        escape_html(&result.enrollment_no)
    );
    let _ = writeln!(
        output,
        "<p>has successfully completed <strong>{}</strong> ({}) by passing {} on {}</p>",
        escape_html(&result.course_name),
        escape_html(&result.course_duration),
        escape_html(&result.assessment_name),
        result.completed_at.format("%d %B %Y")
    );
    let _ = writeln!(
        output,
        "<p>with {} of {} marks (pass mark {}), {}%, grade <strong>{}</strong></p>",
        result.marks_obtained,
        result.total_marks,
        result.passing_marks,
        escape_html(input.percentage),
        escape_html(input.grade)
    );

    if let Some(png) = input.qr_png {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png);
        let _ = writeln!(
            output,
            "<div class=\"qr\"><img alt=\"Verification QR code\" src=\"data:image/png;base64,{encoded}\"></div>"
        );
    }

    let _ = writeln!(
        output,
        "<p class=\"meta\">Certificate No. {} &middot; Issued {}</p>",
        escape_html(input.certificate_number),
        input.issue_date.format("%d %B %Y")
    );
    let _ = writeln!(output, "</div></body>");
    let _ = writeln!(output, "</html>");

    output
}
