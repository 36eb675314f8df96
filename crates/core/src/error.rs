use std::time::Duration;

use thiserror::Error;

use crate::embeddings::EmbeddingError;

/// Problems with a single corpus entry. Never escapes the indexing loop.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed job record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("job record has no title")]
    MissingTitle,

    #[error("invalid salary range {min}-{max}")]
    InvalidSalary { min: i64, max: i64 },

    #[error("could not derive a slug from title {0:?}")]
    EmptySlug(String),

    #[error("duplicate slug {0:?} in corpus")]
    DuplicateSlug(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid response from {backend}: {details}")]
    Backend { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("vector dimension {got} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("index storage is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl PipelineError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Url(_))
    }
}

impl From<EmbeddingError> for PipelineError {
    fn from(error: EmbeddingError) -> Self {
        match error {
            EmbeddingError::Timeout(after) => Self::Timeout {
                operation: "embedding request",
                after,
            },
            other => Self::EmbeddingUnavailable(other.to_string()),
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
