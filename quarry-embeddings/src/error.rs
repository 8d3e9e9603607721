use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("transient embedding failure: {0}")]
    Transient(String),

    #[error("embedding endpoint rejected request: {0}")]
    Rejected(String),

    #[error("missing credentials for remote embeddings")]
    MissingCredentials,

    #[error("failed to initialize local model: {0}")]
    ModelInitialization(String),
}

impl EmbeddingError {
    /// Transient failures are worth retrying; everything else fails fast.
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;
