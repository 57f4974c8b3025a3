use std::time::Duration;

use async_trait::async_trait;

use crate::config::QrConfig;
use crate::error::RenderUnavailable;

/// Source of QR images for a verification payload.
#[async_trait]
pub trait QrCodeProvider: Send + Sync {
    async fn render(&self, payload: &str) -> Result<Vec<u8>, RenderUnavailable>;
}

/// Fetches PNG QR codes from an HTTP image service.
pub struct HttpQrProvider {
    client: reqwest::Client,
    endpoint: String,
    size_px: u32,
    timeout_secs: u64,
    max_attempts: u32,
    backoff: Duration,
}

impl HttpQrProvider {
    pub fn new(config: &QrConfig) -> Result<Self, RenderUnavailable> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| RenderUnavailable::Request(err.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            size_px: config.size_px,
            timeout_secs: config.timeout_secs,
            max_attempts: config.max_attempts.clamp(1, 2),
            backoff: Duration::from_millis(config.backoff_ms),
        })
    }

    fn request_url(&self, payload: &str) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}size={size}x{size}&format=png&data={}",
            self.endpoint,
            urlencoding::encode(payload),
            size = self.size_px,
        )
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, RenderUnavailable> {
        let response = self.client.get(url).send().await.map_err(|err| {
            if err.is_timeout() {
                RenderUnavailable::Timeout(self.timeout_secs)
            } else {
                RenderUnavailable::Request(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderUnavailable::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|err| {
            if err.is_timeout() {
                RenderUnavailable::Timeout(self.timeout_secs)
            } else {
                RenderUnavailable::Request(err.to_string())
            }
        })?;

        if body.is_empty() {
            return Err(RenderUnavailable::EmptyBody);
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl QrCodeProvider for HttpQrProvider {
    async fn render(&self, payload: &str) -> Result<Vec<u8>, RenderUnavailable> {
        let url = self.request_url(payload);
        let mut attempt = 1;

        loop {
            match self.fetch_once(&url).await {
                Ok(image) => return Ok(image),
                Err(err) if attempt < self.max_attempts => {
                    tracing::debug!(attempt, error = %err, "QR request failed, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
