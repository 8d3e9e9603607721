use thiserror::Error;

#[derive(Error, Debug)]
pub enum SymbolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt symbol snapshot: {0}")]
    Corrupt(String),

    #[error("unsupported language for {0}")]
    UnsupportedLanguage(String),

    #[error("parse failure in {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, SymbolError>;
