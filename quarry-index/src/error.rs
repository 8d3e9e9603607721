use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("corrupt index data: {0}")]
    Corrupt(String),

    #[error("chunker error: {0}")]
    Chunker(#[from] quarry_chunker::ChunkerError),

    #[error("embedding error: {0}")]
    Embedding(#[from] quarry_embeddings::EmbeddingError),

    #[error("vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invariant violation: {0}")]
    Fatal(String),

    #[error("walk error: {0}")]
    Walk(String),
}

impl From<ignore::Error> for IndexError {
    fn from(err: ignore::Error) -> Self {
        IndexError::Walk(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
