use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChunkerError {
    #[error("file is not valid UTF-8: {path}")]
    InvalidUtf8 { path: String },
}

pub type Result<T> = std::result::Result<T, ChunkerError>;
