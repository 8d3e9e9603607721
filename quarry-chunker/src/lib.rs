//! # Quarry Chunker
//!
//! Splits source and documentation files into content-bearing windows that
//! the indexing pipeline treats as the unit of retrieval.
//!
//! Code files are cut into fixed line windows with a small overlap so that a
//! definition straddling a boundary is still visible in at least one window.
//! Prose files are cut by whitespace tokens instead, with CJK characters
//! counted as individual tokens.
//!
//! ## Example
//!
//! ```no_run
//! use quarry_chunker::{chunk_bytes, FileKind};
//!
//! # fn main() -> anyhow::Result<()> {
//! let source = b"fn main() {\n    println!(\"hello\");\n}\n";
//! let chunks = chunk_bytes("src/main.rs", source, FileKind::Code)?;
//! println!("generated {} windows", chunks.len());
//! # Ok(())
//! # }
//! ```

mod chunker;
mod error;
mod filetype;

pub use chunker::chunk_bytes;
pub use chunker::is_cjk;
pub use chunker::CODE_WINDOW_LINES;
pub use chunker::CODE_WINDOW_OVERLAP;
pub use chunker::DOC_WINDOW_TOKENS;
pub use chunker::DOC_WINDOW_OVERLAP;
pub use error::ChunkerError;
pub use filetype::classify_path;
pub use filetype::is_binary;
pub use filetype::MAX_FILE_SIZE;

/// Kind of file a chunk was cut from. Decides the windowing rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Code,
    Doc,
}

/// A contiguous window of a file.
///
/// Ordinals are zero-based and contiguous within a file; the indexing layer
/// derives the chunk id from `(project, path, ordinal)`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Chunk {
    /// Source path, relative to the project root, forward-slash separated.
    pub path: String,

    /// Zero-based position of this chunk within its file.
    pub ordinal: u32,

    /// First line covered (1-indexed).
    pub start_line: u32,

    /// Last line covered (1-indexed, inclusive).
    pub end_line: u32,

    /// Raw window text.
    pub text: String,

    /// Windowing rule that produced this chunk.
    pub kind: FileKind,
}
