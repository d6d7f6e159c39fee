use thiserror::Error;

/// Failures while acquiring model binaries
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Invalid model URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP {status} while downloading {url}")]
    Http { status: u16, url: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Downloaded empty body from {0}")]
    Empty(String),

    #[error("HTTP client unavailable: {0}")]
    NoClient(String),

    #[error("Giving up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },
}

impl AssetError {
    /// Client errors other than timeouts and rate limits will not change on retry
    pub fn is_retryable(&self) -> bool {
        match self {
            AssetError::Http { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            AssetError::InvalidUrl(_) | AssetError::NoClient(_) | AssetError::Exhausted { .. } => {
                false
            }
            _ => true,
        }
    }
}

/// Failures talking to the segmentation worker from the host side
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Segmentation worker has shut down")]
    Closed,

    #[error("Failed to spawn segmentation worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Segmentation worker rejected request: {0}")]
    Rejected(String),

    #[error("Unexpected worker response: expected {expected}, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },
}

/// Failures editing the per-object mask collection
#[derive(Debug, Error)]
pub enum AuthoringError {
    #[error("No mask with id {0}")]
    UnknownMask(String),

    #[error("Nothing to commit: the draft has no decoded mask")]
    EmptyDraft,

    #[error("Failed to encode mask image: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Render surface rejected the mask: {0:#}")]
    Surface(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let http = |status| AssetError::Http {
            status,
            url: "https://models.test/encoder.onnx".into(),
        };
        assert!(http(500).is_retryable());
        assert!(http(503).is_retryable());
        assert!(http(429).is_retryable());
        assert!(http(408).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(!http(403).is_retryable());
        assert!(!AssetError::InvalidUrl("x".into()).is_retryable());
        assert!(!AssetError::NoClient("x".into()).is_retryable());
    }
}
