use quarry_embeddings::EmbeddingError;
use quarry_index::IndexError;
use quarry_retrieval::RetrievalError;
use quarry_symbols::SymbolError;
use thiserror::Error;

/// Error kinds surfaced at the operation boundary.
///
/// Components keep their own error types; this is the single vocabulary the
/// tool-protocol layer maps to responses. Degradation is not an error: a
/// degraded result is a successful result with reasons attached.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt index data: {0}")]
    Corrupt(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal invariant violated: {0}")]
    Fatal(String),
}

impl From<IndexError> for CoreError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Corrupt(msg) => CoreError::Corrupt(msg),
            IndexError::Cancelled => CoreError::Cancelled,
            IndexError::Embedding(inner) => inner.into(),
            IndexError::DimensionMismatch { expected, actual } => {
                CoreError::DimensionMismatch { expected, actual }
            }
            IndexError::Io(inner) => CoreError::Transient(inner.to_string()),
            IndexError::Fatal(msg) => CoreError::Fatal(msg),
            other => CoreError::Fatal(other.to_string()),
        }
    }
}

impl From<EmbeddingError> for CoreError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::DimensionMismatch { expected, actual } => {
                CoreError::DimensionMismatch { expected, actual }
            }
            EmbeddingError::Transient(msg) => CoreError::Transient(msg),
            other => CoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<RetrievalError> for CoreError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Cancelled => CoreError::Cancelled,
            RetrievalError::Embedding(inner) => inner.into(),
            RetrievalError::Index(inner) => inner.into(),
            RetrievalError::Llm(inner) => CoreError::Transient(inner.to_string()),
            RetrievalError::Io(inner) => CoreError::Transient(inner.to_string()),
            RetrievalError::Cache(msg) => CoreError::Fatal(msg),
        }
    }
}

impl From<SymbolError> for CoreError {
    fn from(err: SymbolError) -> Self {
        match err {
            SymbolError::Corrupt(msg) => CoreError::Corrupt(msg),
            SymbolError::Io(inner) => CoreError::Transient(inner.to_string()),
            other => CoreError::Fatal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Corrupt(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
