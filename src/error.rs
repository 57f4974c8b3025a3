use thiserror::Error;

/// The eligibility read failed; the run cannot proceed.
#[derive(Debug, Error)]
#[error("eligibility scan failed: {0}")]
pub struct ScanError(pub String);

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("student id {0} cannot be encoded in a certificate number")]
    InvalidStudentId(i64),

    #[error("system clock is before the unix epoch")]
    Clock,

    #[error("certificate number {0} is already taken")]
    Collision(String),
}

/// The QR service could not produce an image.
#[derive(Debug, Error)]
pub enum RenderUnavailable {
    #[error("QR request failed: {0}")]
    Request(String),

    #[error("QR request timed out after {0} seconds")]
    Timeout(u64),

    #[error("QR service answered with status {0}")]
    Status(u16),

    #[error("QR service returned an empty body")]
    EmptyBody,
}

/// The external document transformer could not produce the final artifact.
#[derive(Debug, Error)]
pub enum TransformUnavailable {
    #[error("document transformer is not installed")]
    NotInstalled,

    #[error("document transformer timed out after {0} seconds")]
    Timeout(u64),

    #[error("document transformer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("document transformer produced no output")]
    NoOutput,

    #[error("document transformer I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a rejected certificate insert.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Another run already issued a certificate for this result. Benign.
    #[error("result {result_id} already has a certificate")]
    Duplicate { result_id: i64 },

    #[error("certificate number {0} already exists")]
    NumberCollision(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Why a single item did not end in a persisted certificate.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("invalid result: {0}")]
    InvalidResult(String),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("could not encode verification payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    QrUnavailable(#[from] RenderUnavailable),

    #[error("artifact write failed: {0}")]
    Artifact(#[from] std::io::Error),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl ItemError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Persist(PersistError::Duplicate { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_is_distinguished_from_storage_errors() {
        let duplicate = ItemError::from(PersistError::Duplicate { result_id: 7 });
        let storage = ItemError::from(PersistError::Storage("connection reset".into()));

        assert!(duplicate.is_duplicate());
        assert!(!storage.is_duplicate());
        assert_eq!(duplicate.to_string(), "result 7 already has a certificate");
    }
}
