//! Layered configuration for the issuer.
//!
//! Sources, highest priority first:
//! 1. Environment variables (`CERT_ISSUER_*`, `__` separates sections)
//! 2. The TOML file passed with `--config`, else `certificate-issuer.toml`
//! 3. Built-in defaults
//!
//! `CERT_ISSUER_QR__ON_FAILURE=fail` maps to `qr.on_failure`.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "certificate-issuer.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IssuerConfig {
    #[serde(default)]
    pub certificate: CertificateConfig,
    #[serde(default)]
    pub qr: QrConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CertificateConfig {
    pub prefix: String,
    /// `{number}` is replaced with the URL-encoded certificate number.
    pub verify_url_template: String,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            prefix: "CERT".to_string(),
            verify_url_template: "https://certificates.example.edu/verify?number={number}"
                .to_string(),
        }
    }
}

/// What to do with an item whose QR code could not be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QrFailurePolicy {
    Degrade,
    Fail,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QrConfig {
    pub endpoint: String,
    pub size_px: u32,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub on_failure: QrFailurePolicy,
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.qrserver.com/v1/create-qr-code/".to_string(),
            size_px: 200,
            timeout_secs: 10,
            max_attempts: 2,
            backoff_ms: 250,
            on_failure: QrFailurePolicy::Degrade,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenderConfig {
    /// Executable name or path of the HTML to PDF transformer.
    pub transformer: String,
    pub timeout_secs: u64,
    pub page_size: String,
    pub orientation: String,
    pub margin_mm: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            transformer: "wkhtmltopdf".to_string(),
            timeout_secs: 60,
            page_size: "A4".to_string(),
            orientation: "Landscape".to_string(),
            margin_mm: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub certificate_dir: PathBuf,
    pub qr_dir: PathBuf,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            certificate_dir: PathBuf::from("storage/certificates"),
            qr_dir: PathBuf::from("storage/qrcodes"),
            work_dir: None,
        }
    }
}

impl StorageConfig {
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl IssuerConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        if let Some(explicit) = path {
            if !explicit.is_file() {
                return Err(invalid(
                    "config",
                    &format!("{} does not exist", explicit.display()),
                ));
            }
        }
        let config: Self = Self::figment(path).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match path {
            Some(explicit) => figment = figment.merge(Toml::file(explicit)),
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    figment = figment.merge(Toml::file(local));
                }
            }
        }

        figment.merge(Env::prefixed("CERT_ISSUER_").split("__"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.certificate.prefix.trim().is_empty() {
            return Err(invalid("certificate.prefix", "must not be empty"));
        }
        if !self.certificate.verify_url_template.contains("{number}") {
            return Err(invalid(
                "certificate.verify_url_template",
                "must contain the {number} placeholder",
            ));
        }
        if self.qr.timeout_secs == 0 {
            return Err(invalid("qr.timeout_secs", "must be greater than zero"));
        }
        if !(1..=2).contains(&self.qr.max_attempts) {
            return Err(invalid("qr.max_attempts", "must be 1 or 2"));
        }
        if self.render.timeout_secs == 0 {
            return Err(invalid("render.timeout_secs", "must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = IssuerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.certificate.prefix, "CERT");
        assert_eq!(config.qr.max_attempts, 2);
        assert_eq!(config.qr.on_failure, QrFailurePolicy::Degrade);
        assert_eq!(config.render.transformer, "wkhtmltopdf");
    }

    #[test]
    fn file_and_env_layers_override_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "issuer.toml",
                r#"
                [certificate]
                prefix = "GS"

                [qr]
                on_failure = "fail"
                "#,
            )?;
            jail.set_env("CERT_ISSUER_RENDER__TIMEOUT_SECS", "15");

            let config: IssuerConfig = IssuerConfig::figment(Some(Path::new("issuer.toml")))
                .extract()?;

            assert_eq!(config.certificate.prefix, "GS");
            assert_eq!(config.qr.on_failure, QrFailurePolicy::Fail);
            assert_eq!(config.render.timeout_secs, 15);
            assert_eq!(config.qr.size_px, 200);
            Ok(())
        });
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        let mut config = IssuerConfig::default();
        config.certificate.verify_url_template = "https://example.edu/verify".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "certificate.verify_url_template"
        ));
    }

    #[test]
    fn more_than_two_qr_attempts_is_rejected() {
        let mut config = IssuerConfig::default();
        config.qr.max_attempts = 5;
        assert!(config.validate().is_err());
    }
}
