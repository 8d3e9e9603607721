use crate::error::{Result, RetrievalError};
use crate::Candidate;
use log::{debug, info};
use lru::LruCache;
use quarry_embeddings::dot;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SNAPSHOT_VERSION: u32 = 1;

/// Tuning for one project's query cache.
#[derive(Debug, Clone)]
pub struct QueryCacheConfig {
    /// Entries older than this are treated as absent.
    pub ttl: Duration,

    /// Per-project entry bound; LRU eviction beyond it.
    pub capacity: usize,

    /// Minimum cosine for a semantic-tier hit.
    pub semantic_threshold: f32,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            capacity: 10_000,
            semantic_threshold: 0.95,
        }
    }
}

/// What a cache hit returns: the answer previously produced for the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    pub candidates: Vec<Candidate>,
    pub answer: Option<String>,
    pub degraded_reasons: Vec<String>,
}

/// What to clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    All,
    ExpiredOnly,
}

/// Per-tier entry counts reported by `cache.status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStatus {
    pub exact_entries: usize,
    pub semantic_entries: usize,
    pub last_sweep_purged: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExactEntry {
    result: CachedResult,
    expires_at: i64,
}

#[derive(Serialize, Deserialize)]
struct ExactSnapshot {
    version: u32,
    entries: Vec<(String, ExactEntry)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SemEntry {
    query: String,
    result: CachedResult,
    expires_at: i64,
}

#[derive(Serialize, Deserialize)]
struct SemIdxFile {
    version: u32,
    dim: usize,
    vectors: Vec<f32>,
}

#[derive(Default)]
struct SemanticTier {
    vectors: Vec<f32>,
    entries: Vec<SemEntry>,
}

/// Two-tier query cache: exact (hashed key) and semantic (nearest neighbor
/// over query embeddings).
///
/// A semantic hit is written through to the exact tier under the current
/// query's key, so the next repeat of the same wording is a point lookup.
/// Each tier has its own lock. For projects created without embeddings the
/// semantic tier is inert.
pub struct QueryCache {
    project_id: String,
    exact_path: PathBuf,
    sem_idx_path: PathBuf,
    sem_meta_path: PathBuf,
    config: QueryCacheConfig,
    dim: Option<usize>,
    exact: Mutex<LruCache<String, ExactEntry>>,
    semantic: Mutex<SemanticTier>,
    last_sweep_purged: Mutex<usize>,
}

impl QueryCache {
    /// Open the cache files under `dir`. `dim` of `None` disables the
    /// semantic tier.
    pub fn open(
        dir: &Path,
        project_id: &str,
        dim: Option<usize>,
        config: QueryCacheConfig,
    ) -> Result<Self> {
        let capacity = NonZeroUsize::new(config.capacity)
            .ok_or_else(|| RetrievalError::Cache("cache capacity must be non-zero".to_string()))?;

        let cache = Self {
            project_id: project_id.to_string(),
            exact_path: dir.join("cache_exact.db"),
            sem_idx_path: dir.join("cache_semantic.idx"),
            sem_meta_path: dir.join("cache_semantic.meta"),
            config,
            dim,
            exact: Mutex::new(LruCache::new(capacity)),
            semantic: Mutex::new(SemanticTier::default()),
            last_sweep_purged: Mutex::new(0),
        };
        cache.load()?;
        Ok(cache)
    }

    /// Exact-tier then semantic-tier lookup.
    pub fn get(&self, query: &str, k: usize, query_vector: Option<&[f32]>) -> Option<CachedResult> {
        let now = unix_now();
        let key = self.exact_key(query, k);

        {
            let mut exact = lock(&self.exact);
            if let Some(entry) = exact.get(&key) {
                if entry.expires_at >= now {
                    debug!("exact cache hit for {:?}", preview(query));
                    return Some(entry.result.clone());
                }
                exact.pop(&key);
            }
        }

        let (dim, qv) = match (self.dim, query_vector) {
            (Some(dim), Some(qv)) if qv.len() == dim => (dim, qv),
            _ => return None,
        };

        let hit = {
            let semantic = lock(&self.semantic);
            let mut best: Option<(f32, usize)> = None;
            for (pos, entry) in semantic.entries.iter().enumerate() {
                if entry.expires_at < now {
                    continue;
                }
                let vector = &semantic.vectors[pos * dim..(pos + 1) * dim];
                let cosine = dot(qv, vector);
                if cosine >= self.config.semantic_threshold
                    && best.map(|(score, _)| cosine > score).unwrap_or(true)
                {
                    best = Some((cosine, pos));
                }
            }
            best.map(|(cosine, pos)| {
                debug!(
                    "semantic cache hit ({cosine:.3}) for {:?} via {:?}",
                    preview(query),
                    preview(&semantic.entries[pos].query)
                );
                semantic.entries[pos].result.clone()
            })
        };

        // Write a semantic hit through to the exact tier under the current
        // wording's key.
        if let Some(result) = &hit {
            let mut exact = lock(&self.exact);
            exact.put(
                key,
                ExactEntry {
                    result: result.clone(),
                    expires_at: now + self.config.ttl.as_secs() as i64,
                },
            );
        }
        hit
    }

    /// Insert into both tiers.
    pub fn put(&self, query: &str, k: usize, query_vector: Option<&[f32]>, result: CachedResult) {
        let expires_at = unix_now() + self.config.ttl.as_secs() as i64;
        let key = self.exact_key(query, k);

        {
            let mut exact = lock(&self.exact);
            exact.put(
                key,
                ExactEntry {
                    result: result.clone(),
                    expires_at,
                },
            );
        }

        if let (Some(dim), Some(qv)) = (self.dim, query_vector) {
            if qv.len() == dim {
                let mut semantic = lock(&self.semantic);
                if semantic.entries.len() >= self.config.capacity {
                    semantic.entries.remove(0);
                    semantic.vectors.drain(..dim);
                }
                semantic.vectors.extend_from_slice(qv);
                semantic.entries.push(SemEntry {
                    query: query.to_string(),
                    result,
                    expires_at,
                });
            }
        }
    }

    /// Drop entries. Returns how many were removed.
    pub fn clear(&self, scope: ClearScope) -> usize {
        let now = unix_now();
        let purged = match scope {
            ClearScope::All => {
                let mut exact = lock(&self.exact);
                let mut semantic = lock(&self.semantic);
                let purged = exact.len() + semantic.entries.len();
                exact.clear();
                semantic.entries.clear();
                semantic.vectors.clear();
                purged
            }
            ClearScope::ExpiredOnly => {
                let mut purged = 0;
                {
                    let mut exact = lock(&self.exact);
                    let expired: Vec<String> = exact
                        .iter()
                        .filter(|(_, e)| e.expires_at < now)
                        .map(|(k, _)| k.clone())
                        .collect();
                    purged += expired.len();
                    for key in expired {
                        exact.pop(&key);
                    }
                }
                if let Some(dim) = self.dim {
                    let mut semantic = lock(&self.semantic);
                    let before = semantic.entries.len();
                    let mut vectors = Vec::with_capacity(semantic.vectors.len());
                    let mut entries = Vec::with_capacity(before);
                    for (pos, entry) in semantic.entries.iter().enumerate() {
                        if entry.expires_at >= now {
                            vectors
                                .extend_from_slice(&semantic.vectors[pos * dim..(pos + 1) * dim]);
                            entries.push(entry.clone());
                        }
                    }
                    purged += before - entries.len();
                    semantic.vectors = vectors;
                    semantic.entries = entries;
                }
                purged
            }
        };
        *lock(&self.last_sweep_purged) = purged;
        info!("cache clear ({scope:?}): {purged} entries removed");
        purged
    }

    pub fn status(&self) -> CacheStatus {
        CacheStatus {
            exact_entries: lock(&self.exact).len(),
            semantic_entries: lock(&self.semantic).entries.len(),
            last_sweep_purged: *lock(&self.last_sweep_purged),
        }
    }

    /// Atomic write of all cache files.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.exact_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let snapshot = {
            let exact = lock(&self.exact);
            ExactSnapshot {
                version: SNAPSHOT_VERSION,
                // Most-recent first; load() re-inserts in reverse.
                entries: exact
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            }
        };
        let data = bincode::serialize(&snapshot)
            .map_err(|e| RetrievalError::Cache(e.to_string()))?;
        let tmp = self.exact_path.with_extension("db.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.exact_path)?;

        let Some(dim) = self.dim else {
            return Ok(());
        };
        let semantic = lock(&self.semantic);
        let idx = SemIdxFile {
            version: SNAPSHOT_VERSION,
            dim,
            vectors: semantic.vectors.clone(),
        };
        let data = bincode::serialize(&idx)
            .map_err(|e| RetrievalError::Cache(e.to_string()))?;
        let tmp = self.sem_idx_path.with_extension("idx.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.sem_idx_path)?;

        let tmp = self.sem_meta_path.with_extension("meta.tmp");
        {
            let mut out = fs::File::create(&tmp)?;
            for entry in &semantic.entries {
                writeln!(
                    out,
                    "{}",
                    serde_json::to_string(entry)
                        .map_err(|e| RetrievalError::Cache(e.to_string()))?
                )?;
            }
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.sem_meta_path)?;
        Ok(())
    }

    fn load(&self) -> Result<()> {
        let now = unix_now();

        if self.exact_path.exists() {
            let data = fs::read(&self.exact_path)?;
            if let Ok(snapshot) = bincode::deserialize::<ExactSnapshot>(&data) {
                if snapshot.version == SNAPSHOT_VERSION {
                    let mut exact = lock(&self.exact);
                    for (key, entry) in snapshot.entries.into_iter().rev() {
                        if entry.expires_at >= now {
                            exact.put(key, entry);
                        }
                    }
                }
            }
            // An unreadable cache is dropped, not fatal; it is only a cache.
        }

        let Some(dim) = self.dim else {
            return Ok(());
        };
        if !self.sem_idx_path.exists() || !self.sem_meta_path.exists() {
            return Ok(());
        }

        let data = fs::read(&self.sem_idx_path)?;
        let Ok(idx) = bincode::deserialize::<SemIdxFile>(&data) else {
            return Ok(());
        };
        if idx.version != SNAPSHOT_VERSION || idx.dim != dim {
            return Ok(());
        }

        let file = fs::File::open(&self.sem_meta_path)?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SemEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(_) => return Ok(()),
            }
        }
        if entries.len() * dim != idx.vectors.len() {
            return Ok(());
        }

        let mut semantic = lock(&self.semantic);
        let mut vectors = Vec::new();
        let mut kept = Vec::new();
        for (pos, entry) in entries.into_iter().enumerate() {
            if entry.expires_at >= now {
                vectors.extend_from_slice(&idx.vectors[pos * dim..(pos + 1) * dim]);
                kept.push(entry);
            }
        }
        semantic.vectors = vectors;
        semantic.entries = kept;
        debug!(
            "loaded query cache: {} semantic entries",
            semantic.entries.len()
        );
        Ok(())
    }

    fn exact_key(&self, query: &str, k: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.trim().to_lowercase().as_bytes());
        hasher.update(b"\0");
        hasher.update(self.project_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(k.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn preview(query: &str) -> &str {
    let mut cut = query.len().min(48);
    while cut > 0 && !query.is_char_boundary(cut) {
        cut -= 1;
    }
    &query[..cut]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quarry_embeddings::normalize;
    use tempfile::TempDir;

    fn result(tag: &str) -> CachedResult {
        CachedResult {
            candidates: vec![Candidate {
                chunk_id: format!("p:{tag}.rs:0"),
                path: format!("{tag}.rs"),
                start_line: 1,
                end_line: 10,
                text: format!("content {tag}"),
                keyword_score: Some(1.0),
                vector_score: None,
                fused_score: 1.0,
            }],
            answer: None,
            degraded_reasons: Vec::new(),
        }
    }

    fn unit(values: &[f32]) -> Vec<f32> {
        let mut v = values.to_vec();
        normalize(&mut v);
        v
    }

    fn open(dir: &TempDir, dim: Option<usize>) -> QueryCache {
        QueryCache::open(dir.path(), "p1", dim, QueryCacheConfig::default()).unwrap()
    }

    #[test]
    fn exact_tier_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, None);

        assert!(cache.get("how to login", 5, None).is_none());
        cache.put("how to login", 5, None, result("auth"));

        let hit = cache.get("how to login", 5, None).unwrap();
        assert_eq!(hit.candidates[0].path, "auth.rs");

        // Same query with different k is a different key.
        assert!(cache.get("how to login", 10, None).is_none());
        // Case and surrounding whitespace are normalized away.
        assert!(cache.get("  How To LOGIN  ", 5, None).is_some());
    }

    #[test]
    fn semantic_tier_hits_above_threshold() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, Some(4));

        let qv1 = unit(&[1.0, 0.0, 0.0, 0.0]);
        cache.put("how to authenticate users", 5, Some(&qv1), result("auth"));

        // Nearly identical embedding: cosine > 0.95.
        let qv2 = unit(&[1.0, 0.05, 0.0, 0.0]);
        let hit = cache.get("how do i authenticate a user", 5, Some(&qv2));
        assert!(hit.is_some());

        // Orthogonal embedding: miss.
        let qv3 = unit(&[0.0, 1.0, 0.0, 0.0]);
        assert!(cache.get("matrix eigenvalues", 5, Some(&qv3)).is_none());
    }

    #[test]
    fn semantic_hit_writes_through_to_exact_tier() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, Some(4));

        let qv = unit(&[1.0, 0.0, 0.0, 0.0]);
        cache.put("original wording", 5, Some(&qv), result("auth"));

        let near = unit(&[1.0, 0.02, 0.0, 0.0]);
        assert!(cache.get("new wording", 5, Some(&near)).is_some());
        // Now the new wording hits the exact tier without an embedding.
        assert!(cache.get("new wording", 5, None).is_some());
    }

    #[test]
    fn clear_all_empties_both_tiers() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, Some(4));
        let qv = unit(&[1.0, 0.0, 0.0, 0.0]);
        cache.put("q1", 5, Some(&qv), result("a"));
        cache.put("q2", 5, Some(&qv), result("b"));

        let purged = cache.clear(ClearScope::All);
        assert!(purged >= 2);
        assert!(cache.get("q1", 5, Some(&qv)).is_none());
        let status = cache.status();
        assert_eq!(status.exact_entries, 0);
        assert_eq!(status.semantic_entries, 0);
    }

    #[test]
    fn expired_entries_are_invisible_and_sweepable() {
        let dir = TempDir::new().unwrap();
        let config = QueryCacheConfig {
            ttl: Duration::from_secs(0),
            ..Default::default()
        };
        let cache = QueryCache::open(dir.path(), "p1", Some(4), config).unwrap();
        let qv = unit(&[1.0, 0.0, 0.0, 0.0]);
        cache.put("stale", 5, Some(&qv), result("a"));

        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get("stale", 5, Some(&qv)).is_none());

        let purged = cache.clear(ClearScope::ExpiredOnly);
        assert!(purged >= 1);
        assert_eq!(cache.status().semantic_entries, 0);
    }

    #[test]
    fn persists_and_reloads_both_tiers() {
        let dir = TempDir::new().unwrap();
        let qv = unit(&[1.0, 0.0, 0.0, 0.0]);
        {
            let cache = open(&dir, Some(4));
            cache.put("kept query", 5, Some(&qv), result("auth"));
            cache.persist().unwrap();
        }

        let cache = open(&dir, Some(4));
        assert!(cache.get("kept query", 5, None).is_some());
        assert_eq!(cache.status().semantic_entries, 1);
    }

    #[test]
    fn dimension_mismatched_vectors_are_ignored() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, Some(4));
        let wrong = unit(&[1.0, 0.0]);
        cache.put("q", 5, Some(&wrong), result("a"));
        assert_eq!(cache.status().semantic_entries, 0);
    }
}
