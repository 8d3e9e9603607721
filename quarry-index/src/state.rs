use crate::error::{IndexError, Result};
use crate::scanner::ScannedFile;
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const STATE_VERSION: u32 = 1;

/// Fingerprint of a file as of its last successful indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the project root, forward-slash separated.
    pub path: String,

    /// Modification time, seconds since the epoch.
    pub mtime_s: i64,

    /// Sub-second part of the modification time.
    pub mtime_ns: u32,

    /// Size in bytes.
    pub size: u64,

    /// Hex SHA-256 of the raw bytes.
    pub content_hash: String,

    /// Unix timestamp of the last indexing of this file.
    pub indexed_at: i64,
}

#[derive(Serialize, Deserialize)]
struct StateHeader {
    version: u32,
    #[serde(default)]
    vector_pending: Vec<String>,
}

/// Per-project persistent map of file fingerprints.
///
/// A file appears here iff its chunks are present in the keyword index (and,
/// when vectors are enabled, the vector index or the pending set).
#[derive(Debug, Default)]
pub struct IndexState {
    path: PathBuf,
    files: BTreeMap<String, FileRecord>,

    /// Chunk ids keyword-indexed while the embedder was unavailable; the
    /// next catch-up re-embeds them.
    vector_pending: BTreeSet<String>,
}

impl IndexState {
    /// Load state from `path`, or start empty if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path: path.to_path_buf(),
                ..Default::default()
            });
        }

        let file = fs::File::open(path)?;
        let mut lines = BufReader::new(file).lines();

        let header_line = lines
            .next()
            .ok_or_else(|| IndexError::Corrupt("state file is empty".to_string()))??;
        let header: StateHeader = serde_json::from_str(&header_line)
            .map_err(|e| IndexError::Corrupt(format!("bad state header: {e}")))?;
        if header.version != STATE_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unknown state version {}",
                header.version
            )));
        }

        let mut files = BTreeMap::new();
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: FileRecord = serde_json::from_str(&line)
                .map_err(|e| IndexError::Corrupt(format!("bad state record: {e}")))?;
            files.insert(record.path.clone(), record);
        }

        debug!("loaded index state: {} files", files.len());
        Ok(Self {
            path: path.to_path_buf(),
            files,
            vector_pending: header.vector_pending.into_iter().collect(),
        })
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn put(&mut self, record: FileRecord) {
        self.files.insert(record.path.clone(), record);
    }

    pub fn delete(&mut self, path: &str) {
        self.files.remove(path);
        self.vector_pending.retain(|id| !id_refers_to_path(id, path));
    }

    pub fn iterate(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Drop every record; used when a project is rebuilt from scratch.
    pub fn clear(&mut self) {
        self.files.clear();
        self.vector_pending.clear();
    }

    pub fn mark_vector_pending(&mut self, chunk_ids: impl IntoIterator<Item = String>) {
        self.vector_pending.extend(chunk_ids);
    }

    pub fn take_vector_pending(&mut self) -> Vec<String> {
        std::mem::take(&mut self.vector_pending).into_iter().collect()
    }

    pub fn vector_pending(&self) -> &BTreeSet<String> {
        &self.vector_pending
    }

    /// Atomic write: temp file in the same directory, then rename.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut out = fs::File::create(&tmp)?;
            let header = StateHeader {
                version: STATE_VERSION,
                vector_pending: self.vector_pending.iter().cloned().collect(),
            };
            writeln!(out, "{}", serde_json::to_string(&header)?)?;
            for record in self.files.values() {
                writeln!(out, "{}", serde_json::to_string(record)?)?;
            }
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Build a record for a scanned file, hashing its bytes.
    pub fn record_for(scanned: &ScannedFile, bytes: &[u8]) -> FileRecord {
        FileRecord {
            path: scanned.rel_path.clone(),
            mtime_s: scanned.mtime_s,
            mtime_ns: scanned.mtime_ns,
            size: scanned.size,
            content_hash: content_hash(bytes),
            indexed_at: unix_now(),
        }
    }

    /// Fast unchanged check: nanosecond mtime and size both match.
    pub fn is_unchanged(&self, scanned: &ScannedFile) -> bool {
        match self.files.get(&scanned.rel_path) {
            Some(record) => {
                record.mtime_s == scanned.mtime_s
                    && record.mtime_ns == scanned.mtime_ns
                    && record.size == scanned.size
            }
            None => false,
        }
    }
}

/// `{project}:{path}:{ordinal}` ids start with the project id, so matching a
/// path means checking the middle segment.
fn id_refers_to_path(id: &str, path: &str) -> bool {
    match id.splitn(2, ':').nth(1) {
        Some(rest) => match rest.rsplit_once(':') {
            Some((p, _)) => p == path,
            None => false,
        },
        None => false,
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(path: &str, size: u64) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            mtime_s: 1_700_000_000,
            mtime_ns: 123_456_789,
            size,
            content_hash: "abc".to_string(),
            indexed_at: unix_now(),
        }
    }

    #[test]
    fn roundtrips_through_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.jsonl");

        let mut state = IndexState::load(&path).unwrap();
        state.put(record("src/a.rs", 10));
        state.put(record("src/b.rs", 20));
        state.mark_vector_pending(["p1:src/a.rs:0".to_string()]);
        state.persist().unwrap();

        let loaded = IndexState::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("src/a.rs").unwrap().size, 10);
        assert_eq!(loaded.vector_pending().len(), 1);
    }

    #[test]
    fn unknown_version_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.jsonl");
        fs::write(&path, "{\"version\":99}\n").unwrap();
        assert!(matches!(
            IndexState::load(&path),
            Err(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn garbage_header_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.jsonl");
        fs::write(&path, "not json\n").unwrap();
        assert!(matches!(
            IndexState::load(&path),
            Err(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn delete_clears_pending_ids_for_that_file() {
        let dir = TempDir::new().unwrap();
        let mut state = IndexState::load(&dir.path().join("state.jsonl")).unwrap();
        state.put(record("src/a.rs", 10));
        state.mark_vector_pending([
            "p1:src/a.rs:0".to_string(),
            "p1:src/a.rs:1".to_string(),
            "p1:src/other.rs:0".to_string(),
        ]);

        state.delete("src/a.rs");

        assert!(state.get("src/a.rs").is_none());
        let pending: Vec<&String> = state.vector_pending().iter().collect();
        assert_eq!(pending, vec!["p1:src/other.rs:0"]);
    }

    #[test]
    fn unchanged_requires_exact_mtime_and_size() {
        let dir = TempDir::new().unwrap();
        let mut state = IndexState::load(&dir.path().join("state.jsonl")).unwrap();
        state.put(record("src/a.rs", 10));

        let mut scanned = ScannedFile {
            rel_path: "src/a.rs".to_string(),
            abs_path: dir.path().join("src/a.rs"),
            mtime_s: 1_700_000_000,
            mtime_ns: 123_456_789,
            size: 10,
            kind: quarry_chunker::FileKind::Code,
        };
        assert!(state.is_unchanged(&scanned));

        scanned.mtime_ns += 1;
        assert!(!state.is_unchanged(&scanned));

        scanned.mtime_ns -= 1;
        scanned.size = 11;
        assert!(!state.is_unchanged(&scanned));
    }

    #[test]
    fn content_hash_is_stable_hex_sha256() {
        let h1 = content_hash(b"hello");
        let h2 = content_hash(b"hello");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }
}
