/// Errors seen by anything talking to a beacon server: the display sync agent
/// and the admin client. Classified as fatal (don't retry with the same
/// credentials or payload) or retryable (connectivity).
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    // Fatal
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("validation failed: {0}")]
    Validation(String),

    // Retryable
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    // Operational
    #[error("could not decode payload: {0}")]
    Decode(String),
    #[error("snapshot cache error: {0}")]
    Cache(String),
    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Server { .. } | Self::Network(_) | Self::StreamInterrupted(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Validation(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Validation(_) => "validation",
            Self::Server { .. } => "server_error",
            Self::Network(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Decode(_) => "decode",
            Self::Cache(_) => "cache",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(body),
            400 | 422 => Self::Validation(body),
            _ => Self::Server { status, body },
        }
    }
}
