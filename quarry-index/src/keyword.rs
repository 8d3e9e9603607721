use crate::error::{IndexError, Result};
use crate::IndexedChunk;
use log::debug;
use quarry_chunker::is_cjk;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const SNAPSHOT_VERSION: u32 = 1;

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

/// A scored keyword match.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub id: String,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocEntry {
    path: String,
    start_line: u32,
    end_line: u32,
    text: String,
    token_len: u32,
}

#[derive(Serialize, Deserialize)]
struct KeywordSnapshot {
    version: u32,
    docs: BTreeMap<String, DocEntry>,
    postings: HashMap<String, HashMap<String, u32>>,
}

/// Full-text keyword index over chunks with BM25 scoring.
///
/// Docs are keyed by chunk id (a `BTreeMap`, so ascending-id iteration is the
/// natural tie-break order). Postings map term to per-chunk term frequency.
#[derive(Debug, Default)]
pub struct KeywordIndex {
    path: PathBuf,
    docs: BTreeMap<String, DocEntry>,
    postings: HashMap<String, HashMap<String, u32>>,
    total_tokens: u64,
}

impl KeywordIndex {
    /// Load the snapshot at `path`, or start empty if absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path: path.to_path_buf(),
                ..Default::default()
            });
        }
        let data = fs::read(path)?;
        let snapshot: KeywordSnapshot = bincode::deserialize(&data)
            .map_err(|e| IndexError::Corrupt(format!("unreadable keyword snapshot: {e}")))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unknown keyword snapshot version {}",
                snapshot.version
            )));
        }
        let total_tokens = snapshot.docs.values().map(|d| d.token_len as u64).sum();
        debug!("loaded keyword index: {} chunks", snapshot.docs.len());
        Ok(Self {
            path: path.to_path_buf(),
            docs: snapshot.docs,
            postings: snapshot.postings,
            total_tokens,
        })
    }

    /// Insert or replace chunks. Idempotent per chunk id.
    pub fn upsert_chunks(&mut self, chunks: &[IndexedChunk]) {
        for chunk in chunks {
            self.remove_doc(&chunk.id);
            let tokens = tokenize(&chunk.chunk.text);
            let token_len = tokens.len() as u32;
            for token in &tokens {
                *self
                    .postings
                    .entry(token.clone())
                    .or_default()
                    .entry(chunk.id.clone())
                    .or_insert(0) += 1;
            }
            self.total_tokens += token_len as u64;
            self.docs.insert(
                chunk.id.clone(),
                DocEntry {
                    path: chunk.chunk.path.clone(),
                    start_line: chunk.chunk.start_line,
                    end_line: chunk.chunk.end_line,
                    text: chunk.chunk.text.clone(),
                    token_len,
                },
            );
        }
    }

    /// Remove every chunk whose source path equals `path`.
    pub fn delete_by_file(&mut self, path: &str) {
        let ids: Vec<String> = self
            .docs
            .iter()
            .filter(|(_, doc)| doc.path == path)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            self.remove_doc(&id);
        }
    }

    /// Top-`limit` chunks by BM25, ties broken by chunk id ascending.
    pub fn search(&self, query: &str, limit: usize) -> Vec<KeywordHit> {
        let terms = tokenize(query);
        if terms.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }

        let doc_count = self.docs.len() as f32;
        let avg_len = (self.total_tokens as f32 / doc_count).max(1.0);

        let mut scores: HashMap<&str, f32> = HashMap::new();
        for term in &terms {
            let Some(posting) = self.postings.get(term) else {
                continue;
            };
            let df = posting.len() as f32;
            let idf = ((doc_count - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (id, &tf) in posting {
                let Some(doc) = self.docs.get(id) else {
                    continue;
                };
                let tf = tf as f32;
                let len_norm = 1.0 - BM25_B + BM25_B * doc.token_len as f32 / avg_len;
                let term_score = idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * len_norm);
                *scores.entry(id.as_str()).or_insert(0.0) += term_score;
            }
        }

        let mut scored: Vec<(&str, f32)> = scores.into_iter().collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        scored.truncate(limit);

        scored
            .into_iter()
            .filter_map(|(id, score)| {
                self.docs.get(id).map(|doc| KeywordHit {
                    id: id.to_string(),
                    path: doc.path.clone(),
                    start_line: doc.start_line,
                    end_line: doc.end_line,
                    text: doc.text.clone(),
                    score,
                })
            })
            .collect()
    }

    /// Drop every chunk. The caller re-indexes from the working tree.
    pub fn rebuild(&mut self) {
        self.docs.clear();
        self.postings.clear();
        self.total_tokens = 0;
    }

    /// Chunk text by id, used to re-embed vector-pending chunks.
    pub fn chunk_text(&self, id: &str) -> Option<&str> {
        self.docs.get(id).map(|d| d.text.as_str())
    }

    /// Full stored record for a chunk id, without a score.
    pub fn get(&self, id: &str) -> Option<KeywordHit> {
        self.docs.get(id).map(|doc| KeywordHit {
            id: id.to_string(),
            path: doc.path.clone(),
            start_line: doc.start_line,
            end_line: doc.end_line,
            text: doc.text.clone(),
            score: 0.0,
        })
    }

    /// Chunk ids present for a given source path, ascending.
    pub fn ids_for_file(&self, path: &str) -> Vec<String> {
        self.docs
            .iter()
            .filter(|(_, doc)| doc.path == path)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Source paths present in the index, deduplicated.
    pub fn indexed_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.docs.values().map(|d| d.path.clone()).collect();
        paths.sort();
        paths.dedup();
        paths
    }

    pub fn chunk_count(&self) -> usize {
        self.docs.len()
    }

    /// Atomic snapshot write: temp file then rename.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let snapshot = KeywordSnapshot {
            version: SNAPSHOT_VERSION,
            docs: self.docs.clone(),
            postings: self.postings.clone(),
        };
        let data = bincode::serialize(&snapshot)?;
        let tmp = self.path.with_extension("db.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn remove_doc(&mut self, id: &str) {
        let Some(doc) = self.docs.remove(id) else {
            return;
        };
        self.total_tokens = self.total_tokens.saturating_sub(doc.token_len as u64);
        let tokens = tokenize(&doc.text);
        for token in tokens {
            if let Some(posting) = self.postings.get_mut(&token) {
                posting.remove(id);
                if posting.is_empty() {
                    self.postings.remove(&token);
                }
            }
        }
    }
}

/// Lowercase runs of `[a-z0-9_]`, with each CJK character its own token.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut run = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            run.push(ch.to_ascii_lowercase());
        } else if is_cjk(ch) {
            if !run.is_empty() {
                tokens.push(std::mem::take(&mut run));
            }
            tokens.push(ch.to_string());
        } else if !run.is_empty() {
            tokens.push(std::mem::take(&mut run));
        }
    }
    if !run.is_empty() {
        tokens.push(run);
    }
    tokens
}
