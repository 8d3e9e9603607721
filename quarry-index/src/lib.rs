//! # Quarry Index
//!
//! The per-project index stack: file scanning, change tracking, the BM25
//! keyword index, the flat vector index, and the incremental indexer that
//! keeps all of them converged with the working tree.
//!
//! Every store persists under the project's data directory with atomic
//! temp-and-rename writes; a snapshot that fails validation marks the project
//! for rebuild rather than taking the process down.

mod catchup;
mod error;
mod indexer;
mod keyword;
mod scanner;
mod state;
mod vector;

pub use catchup::CatchUpGate;
pub use error::IndexError;
pub use indexer::catch_up;
pub use indexer::AuxIndex;
pub use indexer::ChangeStats;
pub use indexer::IndexStores;
pub use keyword::KeywordHit;
pub use keyword::KeywordIndex;
pub use scanner::scan_project;
pub use scanner::ScannedFile;
pub use state::FileRecord;
pub use state::IndexState;
pub use vector::VectorEntry;
pub use vector::VectorHit;
pub use vector::VectorIndex;

use quarry_chunker::Chunk;

/// Chunk id: `{project}:{path}:{ordinal}`.
///
/// Project-scoped, stable across rebuilds of unchanged files, and strictly
/// ordered: the ascending id order is the tie-break everywhere scores match.
pub fn chunk_id(project_id: &str, path: &str, ordinal: u32) -> String {
    format!("{project_id}:{path}:{ordinal}")
}

/// A chunk together with its project-scoped identity, as stored in the
/// keyword and vector indexes.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IndexedChunk {
    pub id: String,
    pub chunk: Chunk,
}

impl IndexedChunk {
    pub fn new(project_id: &str, chunk: Chunk) -> Self {
        Self {
            id: chunk_id(project_id, &chunk.path, chunk.ordinal),
            chunk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn chunk_ids_are_project_scoped_and_ordered() {
        let a = chunk_id("ab12cd34", "src/auth.rs", 0);
        let b = chunk_id("ab12cd34", "src/auth.rs", 1);
        assert_eq!(a, "ab12cd34:src/auth.rs:0");
        assert!(a < b);
    }
}
