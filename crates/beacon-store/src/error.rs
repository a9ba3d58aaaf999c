use beacon_core::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Json(String),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl StoreError {
    /// Whether the caller sent a bad payload, as opposed to the store failing.
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Invalid(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Json(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
