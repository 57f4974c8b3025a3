use std::path::PathBuf;

use chrono::{Datelike, NaiveDate};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::allocator::CertificateNumberAllocator;
use crate::config::QrFailurePolicy;
use crate::error::{AllocationError, ItemError, PersistError, ScanError};
use crate::models::{
    CertificateStatus, DocumentFormat, EligibleResult, IssuedCertificate, ItemFailure,
    NewCertificate, RunSummary, Stage,
};
use crate::payload;
use crate::qr::QrCodeProvider;
use crate::render::{ArtifactRenderer, DocumentInput};
use crate::store::IssuanceStore;

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub issue_date: NaiveDate,
    pub verify_url_template: String,
    pub qr_policy: QrFailurePolicy,
}

/// Files written for one item, removed on drop unless committed.
#[derive(Default)]
struct ArtifactGuard {
    paths: Vec<PathBuf>,
    committed: bool,
}

impl ArtifactGuard {
    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "could not remove artifact");
                }
            }
        }
    }
}

pub struct BatchRunner<'a> {
    store: &'a dyn IssuanceStore,
    allocator: &'a CertificateNumberAllocator,
    qr: &'a dyn QrCodeProvider,
    renderer: &'a ArtifactRenderer,
    settings: RunSettings,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        store: &'a dyn IssuanceStore,
        allocator: &'a CertificateNumberAllocator,
        qr: &'a dyn QrCodeProvider,
        renderer: &'a ArtifactRenderer,
        settings: RunSettings,
    ) -> Self {
        Self {
            store,
            allocator,
            qr,
            renderer,
            settings,
        }
    }

    pub async fn run(&self) -> Result<RunSummary, ScanError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("issuance_run", %run_id);
        self.run_items(run_id).instrument(span).await
    }

    async fn run_items(&self, run_id: Uuid) -> Result<RunSummary, ScanError> {
        let pending = self.store.scan().await?;
        info!(
            pending = pending.len(),
            transformer = self.renderer.transformer().is_available(),
            "eligibility scan complete"
        );

        let mut summary = RunSummary::new(run_id);
        for result in &pending {
            summary.attempted += 1;
            let mut stage = Stage::Pending;

            match self.process(result, &mut stage).await {
                Ok(issued) => {
                    info!(
                        result_id = issued.result_id,
                        certificate_number = %issued.certificate_number,
                        degraded = issued.is_degraded(),
                        "certificate issued"
                    );
                    summary.succeeded += 1;
                    summary.issued.push(issued);
                }
                Err(err) if err.is_duplicate() => {
                    warn!(
                        result_id = result.result_id,
                        "certificate already issued by another run"
                    );
                    summary.duplicates.push(result.result_id);
                }
                Err(err) => {
                    error!(
                        result_id = result.result_id,
                        student_id = result.student_id,
                        %stage,
                        error = %err,
                        "certificate issuance failed"
                    );
                    summary.failed += 1;
                    summary.errors.push(ItemFailure {
                        result_id: result.result_id,
                        student_id: result.student_id,
                        stage,
                        cause: err.to_string(),
                    });
                }
            }
        }

        Ok(summary)
    }

    async fn process(
        &self,
        result: &EligibleResult,
        stage: &mut Stage,
    ) -> Result<IssuedCertificate, ItemError> {
        let issue_date = self.settings.issue_date;
        let number = self.allocator.allocate(result.student_id, issue_date.year())?;
        *stage = Stage::Numbered;

        let payload = payload::build(
            result,
            &number,
            issue_date,
            &self.settings.verify_url_template,
        )?;
        let encoded = payload.encode()?;
        *stage = Stage::PayloadBuilt;

        let mut guard = ArtifactGuard::default();

        let qr_png = match self.qr.render(&encoded).await {
            Ok(png) => Some(png),
            Err(err) => match self.settings.qr_policy {
                QrFailurePolicy::Fail => return Err(err.into()),
                QrFailurePolicy::Degrade => {
                    warn!(
                        result_id = result.result_id,
                        error = %err,
                        "QR code unavailable, issuing without it"
                    );
                    None
                }
            },
        };

        let qr_path = match &qr_png {
            Some(png) => {
                let path = self.renderer.qr_path(&number);
                guard.track(path.clone());
                tokio::fs::write(&path, png).await?;
                Some(path)
            }
            None => None,
        };
        *stage = Stage::QrAttempted;

        let document = DocumentInput {
            result,
            certificate_number: &number,
            grade: &payload.grade,
            percentage: &payload.percentage,
            issue_date,
            qr_png: qr_png.as_deref(),
        };
        let intermediate = self.renderer.render_document(&document);
        guard.track(self.renderer.document_path(&number, DocumentFormat::Pdf));
        guard.track(self.renderer.document_path(&number, DocumentFormat::Html));
        let artifact = self
            .renderer
            .transform_document(&intermediate, &number)
            .await?;
        *stage = Stage::DocumentAttempted;

        if let Some(reason) = &artifact.degraded {
            warn!(
                result_id = result.result_id,
                reason = %reason,
                "certificate kept as HTML"
            );
        }

        let certificate = NewCertificate {
            student_id: result.student_id,
            result_id: result.result_id,
            certificate_number: number.clone(),
            issued_date: issue_date,
            artifact_path: artifact.path.clone(),
            qr_path,
            document_format: artifact.format,
            status: CertificateStatus::Generated,
        };

        self.store
            .persist(&certificate)
            .await
            .map_err(|err| match err {
                PersistError::NumberCollision(number) => {
                    ItemError::Allocation(AllocationError::Collision(number))
                }
                other => ItemError::Persist(other),
            })?;
        guard.commit();
        *stage = Stage::Persisted;

        Ok(IssuedCertificate {
            result_id: result.result_id,
            student_id: result.student_id,
            certificate_number: number,
            artifact_path: artifact.path,
            qr_missing: qr_png.is_none(),
            document_degraded: artifact.degraded.is_some(),
        })
    }
}
