use crate::error::{IndexError, Result};
use log::{debug, info};
use quarry_embeddings::dot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const IDX_VERSION: u32 = 1;

/// Dead slots tolerated before a compaction is due, as a fraction of live.
const COMPACTION_RATIO: f32 = 0.25;

/// A scored vector match.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlotMeta {
    id: String,
    path: String,
    start_line: u32,
    end_line: u32,
    text: String,
    #[serde(default)]
    dead: bool,
}

#[derive(Serialize, Deserialize)]
struct MetaHeader {
    version: u32,
    dim: usize,
}

#[derive(Serialize, Deserialize)]
struct IdxFile {
    version: u32,
    dim: usize,
    vectors: Vec<f32>,
}

/// Flat inner-product index over unit-normalized chunk embeddings.
///
/// Slots are append-only; deletes tombstone, and a compaction pass rewrites
/// the file once dead slots exceed a quarter of the live ones. The side
/// table (`vector.meta.jsonl`) carries one line per slot in index order.
#[derive(Debug)]
pub struct VectorIndex {
    idx_path: PathBuf,
    meta_path: PathBuf,
    dim: usize,
    vectors: Vec<f32>,
    slots: Vec<SlotMeta>,
    by_id: HashMap<String, usize>,
    dead: usize,
}

impl VectorIndex {
    /// Read the dimension recorded in an existing index file, if any.
    ///
    /// Lets a caller discover the frozen project dimension before opening
    /// the index proper.
    pub fn peek_dim(idx_path: &Path) -> Result<Option<usize>> {
        if !idx_path.exists() {
            return Ok(None);
        }
        let data = fs::read(idx_path)?;
        let idx: IdxFile = bincode::deserialize(&data)
            .map_err(|e| IndexError::Corrupt(format!("unreadable vector index: {e}")))?;
        Ok(Some(idx.dim))
    }

    /// Open the pair of backing files, or start empty with dimension `dim`.
    pub fn load(idx_path: &Path, meta_path: &Path, dim: usize) -> Result<Self> {
        if !idx_path.exists() {
            return Ok(Self {
                idx_path: idx_path.to_path_buf(),
                meta_path: meta_path.to_path_buf(),
                dim,
                vectors: Vec::new(),
                slots: Vec::new(),
                by_id: HashMap::new(),
                dead: 0,
            });
        }

        let data = fs::read(idx_path)?;
        let idx: IdxFile = bincode::deserialize(&data)
            .map_err(|e| IndexError::Corrupt(format!("unreadable vector index: {e}")))?;
        if idx.version != IDX_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unknown vector index version {}",
                idx.version
            )));
        }
        if idx.dim != dim {
            return Err(IndexError::Corrupt(format!(
                "vector index dimension {} does not match project dimension {dim}",
                idx.dim
            )));
        }

        let file = fs::File::open(meta_path)
            .map_err(|_| IndexError::Corrupt("vector meta file missing".to_string()))?;
        let mut lines = BufReader::new(file).lines();
        let header_line = lines
            .next()
            .ok_or_else(|| IndexError::Corrupt("vector meta file is empty".to_string()))??;
        let header: MetaHeader = serde_json::from_str(&header_line)
            .map_err(|e| IndexError::Corrupt(format!("bad vector meta header: {e}")))?;
        if header.version != IDX_VERSION || header.dim != dim {
            return Err(IndexError::Corrupt(
                "vector meta header does not match index".to_string(),
            ));
        }

        let mut slots = Vec::new();
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let slot: SlotMeta = serde_json::from_str(&line)
                .map_err(|e| IndexError::Corrupt(format!("bad vector meta record: {e}")))?;
            slots.push(slot);
        }

        if slots.len() * dim != idx.vectors.len() {
            return Err(IndexError::Corrupt(format!(
                "vector index has {} floats but meta describes {} slots of dim {dim}",
                idx.vectors.len(),
                slots.len()
            )));
        }

        let mut by_id = HashMap::new();
        let mut dead = 0;
        for (pos, slot) in slots.iter().enumerate() {
            if slot.dead {
                dead += 1;
            } else {
                by_id.insert(slot.id.clone(), pos);
            }
        }

        debug!(
            "loaded vector index: {} live, {} tombstoned",
            by_id.len(),
            dead
        );
        Ok(Self {
            idx_path: idx_path.to_path_buf(),
            meta_path: meta_path.to_path_buf(),
            dim,
            vectors: idx.vectors,
            slots,
            by_id,
            dead,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn live_count(&self) -> usize {
        self.by_id.len()
    }

    /// Insert or replace embedded chunks. Idempotent per chunk id.
    pub fn upsert(
        &mut self,
        entries: impl IntoIterator<Item = (VectorEntry, Vec<f32>)>,
    ) -> Result<()> {
        for (entry, vector) in entries {
            if vector.len() != self.dim {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dim,
                    actual: vector.len(),
                });
            }
            if let Some(&pos) = self.by_id.get(&entry.id) {
                self.slots[pos].dead = true;
                self.dead += 1;
            }
            let pos = self.slots.len();
            self.vectors.extend_from_slice(&vector);
            self.by_id.insert(entry.id.clone(), pos);
            self.slots.push(SlotMeta {
                id: entry.id,
                path: entry.path,
                start_line: entry.start_line,
                end_line: entry.end_line,
                text: entry.text,
                dead: false,
            });
        }
        Ok(())
    }

    /// Tombstone every chunk whose source path equals `path`.
    pub fn delete_by_file(&mut self, path: &str) {
        for slot in self.slots.iter_mut() {
            if !slot.dead && slot.path == path {
                slot.dead = true;
                self.by_id.remove(&slot.id);
                self.dead += 1;
            }
        }
    }

    /// Top-`limit` live chunks by inner product (cosine, since inputs are
    /// unit vectors). Ties broken by chunk id ascending.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(f32, usize)> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.dead)
            .map(|(pos, _)| {
                let vector = &self.vectors[pos * self.dim..(pos + 1) * self.dim];
                (dot(query, vector), pos)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.slots[a.1].id.cmp(&self.slots[b.1].id))
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(score, pos)| {
                let slot = &self.slots[pos];
                VectorHit {
                    id: slot.id.clone(),
                    path: slot.path.clone(),
                    start_line: slot.start_line,
                    end_line: slot.end_line,
                    text: slot.text.clone(),
                    score,
                }
            })
            .collect())
    }

    /// Whether tombstones exceed a quarter of the live vectors.
    pub fn needs_compaction(&self) -> bool {
        self.dead > 0 && (self.dead as f32) > (self.by_id.len() as f32) * COMPACTION_RATIO
    }

    /// Rewrite the index keeping only live slots.
    pub fn compact(&mut self) {
        if self.dead == 0 {
            return;
        }
        info!(
            "compacting vector index: dropping {} tombstones, keeping {}",
            self.dead,
            self.by_id.len()
        );

        let mut vectors = Vec::with_capacity(self.by_id.len() * self.dim);
        let mut slots = Vec::with_capacity(self.by_id.len());
        let mut by_id = HashMap::with_capacity(self.by_id.len());

        for (pos, slot) in self.slots.iter().enumerate() {
            if slot.dead {
                continue;
            }
            let new_pos = slots.len();
            vectors.extend_from_slice(&self.vectors[pos * self.dim..(pos + 1) * self.dim]);
            by_id.insert(slot.id.clone(), new_pos);
            slots.push(slot.clone());
        }

        self.vectors = vectors;
        self.slots = slots;
        self.by_id = by_id;
        self.dead = 0;
    }

    /// Drop everything; the caller re-embeds from the working tree.
    pub fn rebuild(&mut self) {
        self.vectors.clear();
        self.slots.clear();
        self.by_id.clear();
        self.dead = 0;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Atomic write of both backing files.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.idx_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let idx = IdxFile {
            version: IDX_VERSION,
            dim: self.dim,
            vectors: self.vectors.clone(),
        };
        let data = bincode::serialize(&idx)?;
        let tmp = self.idx_path.with_extension("idx.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.idx_path)?;

        let tmp = self.meta_path.with_extension("jsonl.tmp");
        {
            let mut out = fs::File::create(&tmp)?;
            let header = MetaHeader {
                version: IDX_VERSION,
                dim: self.dim,
            };
            writeln!(out, "{}", serde_json::to_string(&header)?)?;
            for slot in &self.slots {
                writeln!(out, "{}", serde_json::to_string(slot)?)?;
            }
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.meta_path)?;
        Ok(())
    }
}

/// Metadata for one embedded chunk, the side-table row.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub id: String,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn entry(id: &str, path: &str) -> VectorEntry {
        VectorEntry {
            id: id.to_string(),
            path: path.to_string(),
            start_line: 1,
            end_line: 50,
            text: format!("text of {id}"),
        }
    }

    fn unit(x: f32, y: f32) -> Vec<f32> {
        let norm = (x * x + y * y).sqrt();
        vec![x / norm, y / norm]
    }

    fn open(dir: &TempDir) -> VectorIndex {
        VectorIndex::load(
            &dir.path().join("vector.idx"),
            &dir.path().join("vector.meta.jsonl"),
            2,
        )
        .unwrap()
    }

    #[test]
    fn search_ranks_by_inner_product() {
        let dir = TempDir::new().unwrap();
        let mut idx = open(&dir);
        idx.upsert([
            (entry("p:a.rs:0", "a.rs"), unit(1.0, 0.0)),
            (entry("p:b.rs:0", "b.rs"), unit(0.0, 1.0)),
        ])
        .unwrap();

        let hits = idx.search(&unit(1.0, 0.1), 2).unwrap();
        assert_eq!(hits[0].path, "a.rs");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut idx = open(&dir);
        let err = idx.upsert([(entry("p:a.rs:0", "a.rs"), vec![1.0, 0.0, 0.0])]);
        assert!(matches!(err, Err(IndexError::DimensionMismatch { .. })));

        let err = idx.search(&[1.0], 5);
        assert!(matches!(err, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn delete_tombstones_and_compaction_threshold_trips() {
        let dir = TempDir::new().unwrap();
        let mut idx = open(&dir);
        for i in 0..8 {
            idx.upsert([(entry(&format!("p:f{i}.rs:0"), &format!("f{i}.rs")), unit(1.0, i as f32))])
                .unwrap();
        }
        assert!(!idx.needs_compaction());

        idx.delete_by_file("f0.rs");
        idx.delete_by_file("f1.rs");
        idx.delete_by_file("f2.rs");
        // 3 dead vs 5 live: over the 25% threshold.
        assert!(idx.needs_compaction());
        assert_eq!(idx.live_count(), 5);

        idx.compact();
        assert!(!idx.needs_compaction());
        assert_eq!(idx.live_count(), 5);
        assert!(idx.search(&unit(1.0, 0.0), 10).unwrap().len() == 5);
    }

    #[test]
    fn upsert_replaces_existing_id() {
        let dir = TempDir::new().unwrap();
        let mut idx = open(&dir);
        idx.upsert([(entry("p:a.rs:0", "a.rs"), unit(1.0, 0.0))]).unwrap();
        idx.upsert([(entry("p:a.rs:0", "a.rs"), unit(0.0, 1.0))]).unwrap();

        assert_eq!(idx.live_count(), 1);
        let hits = idx.search(&unit(0.0, 1.0), 1).unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ties_break_by_chunk_id_ascending() {
        let dir = TempDir::new().unwrap();
        let mut idx = open(&dir);
        let v = unit(1.0, 0.0);
        idx.upsert([
            (entry("p:z.rs:0", "z.rs"), v.clone()),
            (entry("p:a.rs:0", "a.rs"), v.clone()),
        ])
        .unwrap();

        let hits = idx.search(&v, 2).unwrap();
        assert_eq!(hits[0].id, "p:a.rs:0");
        assert_eq!(hits[1].id, "p:z.rs:0");
    }

    #[test]
    fn persists_and_reloads_with_tombstones() {
        let dir = TempDir::new().unwrap();
        {
            let mut idx = open(&dir);
            idx.upsert([
                (entry("p:a.rs:0", "a.rs"), unit(1.0, 0.0)),
                (entry("p:b.rs:0", "b.rs"), unit(0.0, 1.0)),
            ])
            .unwrap();
            idx.delete_by_file("b.rs");
            idx.persist().unwrap();
        }

        let idx = open(&dir);
        assert_eq!(idx.live_count(), 1);
        assert!(idx.contains("p:a.rs:0"));
        assert!(!idx.contains("p:b.rs:0"));
    }

    #[test]
    fn mismatched_project_dimension_is_corrupt() {
        let dir = TempDir::new().unwrap();
        {
            let mut idx = open(&dir);
            idx.upsert([(entry("p:a.rs:0", "a.rs"), unit(1.0, 0.0))]).unwrap();
            idx.persist().unwrap();
        }
        let reopened = VectorIndex::load(
            &dir.path().join("vector.idx"),
            &dir.path().join("vector.meta.jsonl"),
            3,
        );
        assert!(matches!(reopened, Err(IndexError::Corrupt(_))));
    }
}
