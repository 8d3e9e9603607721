use crate::error::{IndexError, Result};
use crate::keyword::KeywordIndex;
use crate::scanner::{scan_project, ScannedFile};
use crate::state::{content_hash, IndexState};
use crate::vector::{VectorEntry, VectorIndex};
use crate::IndexedChunk;
use log::{debug, info, warn};
use quarry_chunker::{chunk_bytes, is_binary};
use quarry_embeddings::Embedder;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// No single file may stall the catch-up longer than this.
const FILE_DEADLINE: Duration = Duration::from_secs(60);

/// Result of one catch-up pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeStats {
    pub added: u32,
    pub modified: u32,
    pub deleted: u32,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

/// The index stack mutated by a catch-up pass, owned behind the project's
/// write lock.
pub struct IndexStores {
    pub state: IndexState,
    pub keyword: KeywordIndex,
    pub vector: Option<VectorIndex>,
}

/// A secondary index refreshed in the same pass as the primary ones.
/// Failures inside an implementation must not fail the catch-up.
pub trait AuxIndex: Send {
    fn file_indexed(&mut self, path: &str, text: &str);
    fn file_deleted(&mut self, path: &str);
}

/// Bring a project's indexes up to date with its working tree.
///
/// Single-file errors are recorded in `ChangeStats::errors` and the file is
/// retried on the next pass; only a state-persistence failure fails the whole
/// call. Partial mutations are never rolled back on cancellation; the next
/// catch-up converges.
pub async fn catch_up(
    project_id: &str,
    root: &Path,
    stores: &mut IndexStores,
    embedder: Option<&dyn Embedder>,
    aux: &mut [&mut dyn AuxIndex],
    cancel: &CancellationToken,
) -> Result<ChangeStats> {
    let start = Instant::now();
    let mut stats = ChangeStats::default();

    let scanned = scan_project(root)?;
    debug!("catch-up {project_id}: {} files in tree", scanned.len());

    reconcile_orphans(stores, aux);
    reembed_pending(stores, embedder, &mut stats).await;

    // Deletions: in state but gone from the tree.
    let deleted: Vec<String> = {
        let present: std::collections::HashSet<&str> =
            scanned.iter().map(|f| f.rel_path.as_str()).collect();
        stores
            .state
            .iterate()
            .map(|r| r.path.clone())
            .filter(|p| !present.contains(p.as_str()))
            .collect()
    };
    for path in deleted {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        stores.keyword.delete_by_file(&path);
        if let Some(vector) = stores.vector.as_mut() {
            vector.delete_by_file(&path);
        }
        stores.state.delete(&path);
        for a in aux.iter_mut() {
            a.file_deleted(&path);
        }
        stats.deleted += 1;
    }

    // Additions and modifications.
    for file in &scanned {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        if stores.state.is_unchanged(file) {
            continue;
        }
        let existed = stores.state.get(&file.rel_path).is_some();
        match index_one_file(project_id, file, stores, embedder, aux, existed).await {
            Ok(FileOutcome::Indexed) => {
                if existed {
                    stats.modified += 1;
                } else {
                    stats.added += 1;
                }
            }
            Ok(FileOutcome::Skipped) => {}
            Err(err) => {
                warn!("indexing {} failed: {err}", file.rel_path);
                stats.errors.push(format!("{}: {err}", file.rel_path));
            }
        }
    }

    if let Some(vector) = stores.vector.as_mut() {
        if vector.needs_compaction() {
            vector.compact();
        }
    }

    stores.keyword.persist()?;
    if let Some(vector) = stores.vector.as_ref() {
        vector.persist()?;
    }
    stores.state.persist()?;

    stats.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "catch-up {project_id}: +{} ~{} -{} in {}ms ({} errors)",
        stats.added,
        stats.modified,
        stats.deleted,
        stats.duration_ms,
        stats.errors.len()
    );
    Ok(stats)
}

enum FileOutcome {
    Indexed,
    Skipped,
}

async fn index_one_file(
    project_id: &str,
    file: &ScannedFile,
    stores: &mut IndexStores,
    embedder: Option<&dyn Embedder>,
    aux: &mut [&mut dyn AuxIndex],
    existed: bool,
) -> Result<FileOutcome> {
    let bytes = std::fs::read(&file.abs_path)?;
    if is_binary(&bytes) {
        debug!("skipping binary file {}", file.rel_path);
        return Ok(FileOutcome::Skipped);
    }
    if bytes.len() as u64 > quarry_chunker::MAX_FILE_SIZE {
        return Ok(FileOutcome::Skipped);
    }

    // mtime moved but content did not: refresh the fingerprint, skip reindex.
    let hash = content_hash(&bytes);
    if let Some(record) = stores.state.get(&file.rel_path) {
        if record.content_hash == hash {
            stores.state.put(IndexState::record_for(file, &bytes));
            return Ok(FileOutcome::Skipped);
        }
    }

    let text = String::from_utf8_lossy(&bytes).into_owned();
    let chunks = chunk_bytes(&file.rel_path, &bytes, file.kind)?;

    if existed {
        stores.keyword.delete_by_file(&file.rel_path);
        if let Some(vector) = stores.vector.as_mut() {
            vector.delete_by_file(&file.rel_path);
        }
    }
    if chunks.is_empty() {
        stores.state.put(IndexState::record_for(file, &bytes));
        return Ok(FileOutcome::Indexed);
    }

    let indexed: Vec<IndexedChunk> = chunks
        .into_iter()
        .map(|c| IndexedChunk::new(project_id, c))
        .collect();
    stores.keyword.upsert_chunks(&indexed);

    if let Some(vector) = stores.vector.as_mut() {
        match embedder {
            Some(embedder) => {
                let texts: Vec<String> =
                    indexed.iter().map(|c| c.chunk.text.clone()).collect();
                let embedded =
                    match tokio::time::timeout(FILE_DEADLINE, embedder.embed(&texts)).await {
                        Ok(Ok(vectors)) => vectors,
                        Ok(Err(err)) => {
                            // Roll the file back out of the keyword index so
                            // the next pass retries it whole.
                            stores.keyword.delete_by_file(&file.rel_path);
                            return Err(err.into());
                        }
                        Err(_) => {
                            stores.keyword.delete_by_file(&file.rel_path);
                            return Err(IndexError::Fatal(format!(
                                "embedding {} made no progress within {}s",
                                file.rel_path,
                                FILE_DEADLINE.as_secs()
                            )));
                        }
                    };
                let entries = indexed.iter().zip(embedded).map(|(chunk, vector)| {
                    (
                        VectorEntry {
                            id: chunk.id.clone(),
                            path: chunk.chunk.path.clone(),
                            start_line: chunk.chunk.start_line,
                            end_line: chunk.chunk.end_line,
                            text: chunk.chunk.text.clone(),
                        },
                        vector,
                    )
                });
                vector.upsert(entries)?;
            }
            None => {
                // Keyword-indexed now, embedded on a later pass.
                stores
                    .state
                    .mark_vector_pending(indexed.iter().map(|c| c.id.clone()));
            }
        }
    }

    stores.state.put(IndexState::record_for(file, &bytes));
    for a in aux.iter_mut() {
        a.file_indexed(&file.rel_path, &text);
    }
    Ok(FileOutcome::Indexed)
}

/// Crash recovery: any file present in the keyword index but absent from the
/// state map never had its catch-up committed; purge it so the next diff
/// re-adds it cleanly.
fn reconcile_orphans(stores: &mut IndexStores, aux: &mut [&mut dyn AuxIndex]) {
    let orphans: Vec<String> = stores
        .keyword
        .indexed_paths()
        .into_iter()
        .filter(|p| stores.state.get(p).is_none())
        .collect();
    for path in orphans {
        warn!("purging orphaned index rows for {path}");
        stores.keyword.delete_by_file(&path);
        if let Some(vector) = stores.vector.as_mut() {
            vector.delete_by_file(&path);
        }
        for a in aux.iter_mut() {
            a.file_deleted(&path);
        }
    }
}

/// Re-embed chunks that were keyword-indexed while the embedder was away.
async fn reembed_pending(
    stores: &mut IndexStores,
    embedder: Option<&dyn Embedder>,
    stats: &mut ChangeStats,
) {
    let (Some(vector), Some(embedder)) = (stores.vector.as_mut(), embedder) else {
        return;
    };
    if stores.state.vector_pending().is_empty() {
        return;
    }

    let pending = stores.state.take_vector_pending();
    let mut entries = Vec::new();
    let mut texts = Vec::new();
    for id in &pending {
        let Some(hit) = stores.keyword.get(id) else {
            continue;
        };
        texts.push(hit.text.clone());
        entries.push(VectorEntry {
            id: hit.id,
            path: hit.path,
            start_line: hit.start_line,
            end_line: hit.end_line,
            text: hit.text,
        });
    }
    if entries.is_empty() {
        return;
    }

    info!("re-embedding {} pending chunks", entries.len());
    match embedder.embed(&texts).await {
        Ok(vectors) => {
            if let Err(err) = vector.upsert(entries.into_iter().zip(vectors)) {
                warn!("pending re-embed upsert failed: {err}");
                stats.errors.push(format!("vector-pending: {err}"));
                stores.state.mark_vector_pending(pending);
            }
        }
        Err(err) => {
            warn!("pending re-embed failed: {err}");
            stats.errors.push(format!("vector-pending: {err}"));
            stores.state.mark_vector_pending(pending);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::IndexState;
    use pretty_assertions::assert_eq;
    use quarry_embeddings::HashEmbedder;
    use std::fs;
    use tempfile::TempDir;

    const DIM: usize = 32;

    struct Fixture {
        project: TempDir,
        data: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                project: TempDir::new().unwrap(),
                data: TempDir::new().unwrap(),
            }
        }

        fn stores(&self, vectors: bool) -> IndexStores {
            IndexStores {
                state: IndexState::load(&self.data.path().join("state.jsonl")).unwrap(),
                keyword: KeywordIndex::load(&self.data.path().join("keyword.db")).unwrap(),
                vector: vectors.then(|| {
                    VectorIndex::load(
                        &self.data.path().join("vector.idx"),
                        &self.data.path().join("vector.meta.jsonl"),
                        DIM,
                    )
                    .unwrap()
                }),
            }
        }

        fn write(&self, rel: &str, contents: &str) {
            let path = self.project.path().join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, contents).unwrap();
        }
    }

    async fn run(fixture: &Fixture, stores: &mut IndexStores, embedder: Option<&dyn Embedder>) -> ChangeStats {
        catch_up(
            "p1",
            fixture.project.path(),
            stores,
            embedder,
            &mut [],
            &CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn empty_project_returns_zero_stats() {
        let fixture = Fixture::new();
        let mut stores = fixture.stores(false);
        let stats = run(&fixture, &mut stores, None).await;
        assert_eq!((stats.added, stats.modified, stats.deleted), (0, 0, 0));
        assert!(stats.errors.is_empty());
    }

    #[tokio::test]
    async fn indexes_added_files() {
        let fixture = Fixture::new();
        fixture.write("a.py", "def login(u,p):\n    return check(u,p)\n");
        let embedder = HashEmbedder::new(DIM);
        let mut stores = fixture.stores(true);

        let stats = run(&fixture, &mut stores, Some(&embedder)).await;
        assert_eq!(stats.added, 1);
        assert_eq!(stores.state.len(), 1);
        assert_eq!(stores.keyword.chunk_count(), 1);
        assert_eq!(stores.vector.as_ref().unwrap().live_count(), 1);
        assert!(stores.keyword.get("p1:a.py:0").is_some());
    }

    #[tokio::test]
    async fn detects_modification_and_replaces_chunks() {
        let fixture = Fixture::new();
        fixture.write("a.py", "def login(u,p):\n    return check(u,p)\n");
        let embedder = HashEmbedder::new(DIM);
        let mut stores = fixture.stores(true);
        run(&fixture, &mut stores, Some(&embedder)).await;
        let hash_before = stores.state.get("a.py").unwrap().content_hash.clone();

        fixture.write(
            "a.py",
            "def login(u,p):\n    return check(u,p)\ndef logout():\n    pass\n",
        );
        let stats = run(&fixture, &mut stores, Some(&embedder)).await;
        assert_eq!(stats.modified, 1);
        assert_ne!(stores.state.get("a.py").unwrap().content_hash, hash_before);

        let hits = stores.keyword.search("logout", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].start_line, 1);
        assert_eq!(hits[0].end_line, 4);
    }

    #[tokio::test]
    async fn detects_deletion_and_purges_everywhere() {
        let fixture = Fixture::new();
        fixture.write("a.py", "def login(u,p):\n    return check(u,p)\n");
        let embedder = HashEmbedder::new(DIM);
        let mut stores = fixture.stores(true);
        run(&fixture, &mut stores, Some(&embedder)).await;

        fs::remove_file(fixture.project.path().join("a.py")).unwrap();
        let stats = run(&fixture, &mut stores, Some(&embedder)).await;
        assert_eq!(stats.deleted, 1);
        assert_eq!(stores.state.len(), 0);
        assert_eq!(stores.keyword.chunk_count(), 0);
        assert_eq!(stores.vector.as_ref().unwrap().live_count(), 0);
    }

    #[tokio::test]
    async fn unchanged_files_are_not_reprocessed() {
        let fixture = Fixture::new();
        fixture.write("a.rs", "fn one() {}\n");
        let mut stores = fixture.stores(false);
        let first = run(&fixture, &mut stores, None).await;
        assert_eq!(first.added, 1);

        let second = run(&fixture, &mut stores, None).await;
        assert_eq!((second.added, second.modified, second.deleted), (0, 0, 0));
    }

    #[tokio::test]
    async fn binary_files_are_skipped() {
        let fixture = Fixture::new();
        let path = fixture.project.path().join("blob.rs");
        fs::write(&path, b"fn x() {}\0\0binary").unwrap();
        let mut stores = fixture.stores(false);

        let stats = run(&fixture, &mut stores, None).await;
        assert_eq!(stats.added, 0);
        assert_eq!(stores.state.len(), 0);
    }

    #[tokio::test]
    async fn missing_embedder_parks_chunks_in_pending() {
        let fixture = Fixture::new();
        fixture.write("a.rs", "fn pending_me() {}\n");
        let mut stores = fixture.stores(true);

        let stats = run(&fixture, &mut stores, None).await;
        assert_eq!(stats.added, 1);
        assert_eq!(stores.keyword.chunk_count(), 1);
        assert_eq!(stores.vector.as_ref().unwrap().live_count(), 0);
        assert_eq!(stores.state.vector_pending().len(), 1);

        // Embedder comes back: the next pass drains the pending set.
        let embedder = HashEmbedder::new(DIM);
        run(&fixture, &mut stores, Some(&embedder)).await;
        assert!(stores.state.vector_pending().is_empty());
        assert_eq!(stores.vector.as_ref().unwrap().live_count(), 1);
    }

    #[tokio::test]
    async fn orphaned_keyword_rows_are_reconciled() {
        let fixture = Fixture::new();
        fixture.write("a.rs", "fn real() {}\n");
        let mut stores = fixture.stores(false);
        run(&fixture, &mut stores, None).await;

        // Simulate a crash that committed keyword rows but not state.
        stores.state.delete("a.rs");
        let stats = run(&fixture, &mut stores, None).await;
        // The orphan purge runs first, then the scan re-adds the file.
        assert_eq!(stats.added, 1);
        assert_eq!(stores.keyword.chunk_count(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_early_without_rollback() {
        let fixture = Fixture::new();
        fixture.write("a.rs", "fn a() {}\n");
        let mut stores = fixture.stores(false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = catch_up(
            "p1",
            fixture.project.path(),
            &mut stores,
            None,
            &mut [],
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(IndexError::Cancelled)));
    }
}
