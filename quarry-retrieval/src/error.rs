use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("embedding error: {0}")]
    Embedding(#[from] quarry_embeddings::EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] quarry_index::IndexError),

    #[error("llm error: {0}")]
    Llm(#[from] crate::llm::LlmError),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
