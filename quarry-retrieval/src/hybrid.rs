use crate::error::{Result, RetrievalError};
use crate::{degraded, Candidate};
use log::{debug, warn};
use quarry_embeddings::Embedder;
use quarry_index::{KeywordIndex, VectorIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Both sub-searches over-fetch `k * OVERFETCH_FACTOR` before fusion.
pub const OVERFETCH_FACTOR: usize = 3;

/// At most this many chunks per source file survive deduplication.
pub const PER_FILE_LIMIT: usize = 2;

/// Relative weight of the two score sources when a chunk appears in both.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionWeights {
    pub keyword: f32,
    pub vector: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            keyword: 0.5,
            vector: 0.5,
        }
    }
}

/// Result of a hybrid search, with any degradations named.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub candidates: Vec<Candidate>,
    pub degraded_reasons: Vec<String>,
}

/// Run keyword and vector search, fuse, deduplicate per file.
///
/// `query_vector` lets the caller hand in an embedding it already computed
/// (for the semantic cache probe); otherwise the embedder is asked here,
/// concurrently with the keyword search. A missing or failing vector side
/// degrades the search to keyword-only rather than failing it.
pub async fn hybrid_search(
    keyword: &KeywordIndex,
    vector: Option<&VectorIndex>,
    embedder: Option<&dyn Embedder>,
    query: &str,
    k: usize,
    weights: FusionWeights,
    query_vector: Option<Vec<f32>>,
    cancel: &CancellationToken,
) -> Result<SearchOutcome> {
    if query.trim().is_empty() {
        return Ok(SearchOutcome::default());
    }
    if cancel.is_cancelled() {
        return Err(RetrievalError::Cancelled);
    }

    let fetch = k * OVERFETCH_FACTOR;
    let mut reasons = Vec::new();

    let keyword_fut = async { keyword.search(query, fetch) };
    let vector_fut = async {
        let index = vector?;
        let qv = match query_vector {
            Some(qv) => qv,
            None => match embedder {
                Some(embedder) => {
                    let inputs = vec![query.to_string()];
                    match embedder.embed(&inputs).await {
                        Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
                        Ok(_) => return Some(Err(degraded::EMBEDDER_UNAVAILABLE)),
                        Err(err) => {
                            warn!("query embedding failed: {err}");
                            return Some(Err(degraded::EMBEDDER_UNAVAILABLE));
                        }
                    }
                }
                None => return Some(Err(degraded::EMBEDDER_UNAVAILABLE)),
            },
        };
        match index.search(&qv, fetch) {
            Ok(hits) => Some(Ok(hits)),
            Err(err) => {
                warn!("vector search failed: {err}");
                Some(Err(degraded::VECTOR_UNAVAILABLE))
            }
        }
    };

    let (keyword_hits, vector_side) = tokio::join!(keyword_fut, vector_fut);

    let vector_hits = match vector_side {
        None => {
            reasons.push(degraded::VECTOR_UNAVAILABLE.to_string());
            Vec::new()
        }
        Some(Err(reason)) => {
            reasons.push(reason.to_string());
            Vec::new()
        }
        Some(Ok(hits)) => hits,
    };

    if cancel.is_cancelled() {
        return Err(RetrievalError::Cancelled);
    }

    // Merge by chunk id. Keyword scores are normalized by the in-list max;
    // vector scores are already cosines in [-1, 1].
    let keyword_max = keyword_hits
        .iter()
        .map(|h| h.score)
        .fold(0.0f32, f32::max);

    struct Merged {
        path: String,
        start_line: u32,
        end_line: u32,
        text: String,
        keyword_score: Option<f32>,
        vector_score: Option<f32>,
    }

    let mut merged: HashMap<String, Merged> = HashMap::new();
    for hit in keyword_hits {
        let normalized = if keyword_max > 0.0 {
            hit.score / keyword_max
        } else {
            0.0
        };
        merged.insert(
            hit.id.clone(),
            Merged {
                path: hit.path,
                start_line: hit.start_line,
                end_line: hit.end_line,
                text: hit.text,
                keyword_score: Some(normalized),
                vector_score: None,
            },
        );
    }
    let vector_empty = vector_hits.is_empty();
    for hit in vector_hits {
        merged
            .entry(hit.id.clone())
            .and_modify(|m| m.vector_score = Some(hit.score))
            .or_insert(Merged {
                path: hit.path,
                start_line: hit.start_line,
                end_line: hit.end_line,
                text: hit.text,
                keyword_score: None,
                vector_score: Some(hit.score),
            });
    }

    let mut candidates: Vec<Candidate> = merged
        .into_iter()
        .map(|(id, m)| {
            let fused = if vector_empty {
                m.keyword_score.unwrap_or(0.0)
            } else {
                weights.keyword * m.keyword_score.unwrap_or(0.0)
                    + weights.vector * m.vector_score.unwrap_or(0.0)
            };
            Candidate {
                chunk_id: id,
                path: m.path,
                start_line: m.start_line,
                end_line: m.end_line,
                text: m.text,
                keyword_score: m.keyword_score,
                vector_score: m.vector_score,
                fused_score: fused,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    // Per-file dedup: keep at most PER_FILE_LIMIT chunks per source path.
    let mut per_file: HashMap<&str, usize> = HashMap::new();
    let mut deduped = Vec::with_capacity(candidates.len());
    for candidate in &candidates {
        let seen = per_file.entry(candidate.path.as_str()).or_insert(0);
        if *seen < PER_FILE_LIMIT {
            *seen += 1;
            deduped.push(candidate.clone());
        }
    }
    deduped.truncate(fetch);

    debug!(
        "hybrid search: {} candidates after dedup ({:?})",
        deduped.len(),
        reasons
    );
    Ok(SearchOutcome {
        candidates: deduped,
        degraded_reasons: reasons,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quarry_chunker::{Chunk, FileKind};
    use quarry_embeddings::HashEmbedder;
    use quarry_index::{IndexedChunk, VectorEntry};
    use tempfile::TempDir;

    const DIM: usize = 64;

    fn chunk(path: &str, ordinal: u32, text: &str) -> IndexedChunk {
        IndexedChunk::new(
            "p1",
            Chunk {
                path: path.to_string(),
                ordinal,
                start_line: ordinal * 40 + 1,
                end_line: ordinal * 40 + 50,
                text: text.to_string(),
                kind: FileKind::Code,
            },
        )
    }

    async fn build_indexes(
        dir: &TempDir,
        chunks: &[IndexedChunk],
        embedder: &HashEmbedder,
    ) -> (KeywordIndex, VectorIndex) {
        let mut keyword = KeywordIndex::load(&dir.path().join("keyword.db")).unwrap();
        keyword.upsert_chunks(chunks);

        let mut vector = VectorIndex::load(
            &dir.path().join("vector.idx"),
            &dir.path().join("vector.meta.jsonl"),
            DIM,
        )
        .unwrap();
        let texts: Vec<String> = chunks.iter().map(|c| c.chunk.text.clone()).collect();
        let vectors = embedder.embed(&texts).await.unwrap();
        vector
            .upsert(chunks.iter().zip(vectors).map(|(c, v)| {
                (
                    VectorEntry {
                        id: c.id.clone(),
                        path: c.chunk.path.clone(),
                        start_line: c.chunk.start_line,
                        end_line: c.chunk.end_line,
                        text: c.chunk.text.clone(),
                    },
                    v,
                )
            }))
            .unwrap();
        (keyword, vector)
    }

    #[tokio::test]
    async fn empty_query_short_circuits() {
        let dir = TempDir::new().unwrap();
        let keyword = KeywordIndex::load(&dir.path().join("keyword.db")).unwrap();
        let outcome = hybrid_search(
            &keyword,
            None,
            None,
            "   ",
            5,
            FusionWeights::default(),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(outcome.candidates.is_empty());
        assert!(outcome.degraded_reasons.is_empty());
    }

    #[tokio::test]
    async fn fuses_keyword_and_vector_scores() {
        let dir = TempDir::new().unwrap();
        let embedder = HashEmbedder::new(DIM);
        let chunks = vec![
            chunk("auth.rs", 0, "fn login(user: &str) -> bool { authenticate(user) }"),
            chunk("db.rs", 0, "fn connect() -> Connection { Connection::open() }"),
        ];
        let (keyword, vector) = build_indexes(&dir, &chunks, &embedder).await;

        let outcome = hybrid_search(
            &keyword,
            Some(&vector),
            Some(&embedder),
            "login user",
            5,
            FusionWeights::default(),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(outcome.degraded_reasons.is_empty());
        assert_eq!(outcome.candidates[0].path, "auth.rs");
        let top = &outcome.candidates[0];
        assert!(top.keyword_score.is_some());
        assert!(top.vector_score.is_some());
        assert!(top.fused_score > 0.0);
    }

    #[tokio::test]
    async fn missing_embedder_degrades_to_keyword_only() {
        let dir = TempDir::new().unwrap();
        let embedder = HashEmbedder::new(DIM);
        let chunks = vec![chunk("auth.rs", 0, "fn login() {}")];
        let (keyword, vector) = build_indexes(&dir, &chunks, &embedder).await;

        let outcome = hybrid_search(
            &keyword,
            Some(&vector),
            None,
            "login",
            5,
            FusionWeights::default(),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome.degraded_reasons,
            vec![degraded::EMBEDDER_UNAVAILABLE.to_string()]
        );
        assert_eq!(outcome.candidates.len(), 1);
        // Keyword-only degradation: fused equals the normalized keyword score.
        assert_eq!(outcome.candidates[0].fused_score, 1.0);
        assert!(outcome.candidates[0].vector_score.is_none());
    }

    #[tokio::test]
    async fn no_vector_index_flags_vector_unavailable() {
        let dir = TempDir::new().unwrap();
        let mut keyword = KeywordIndex::load(&dir.path().join("keyword.db")).unwrap();
        keyword.upsert_chunks(&[chunk("a.rs", 0, "needle text")]);

        let outcome = hybrid_search(
            &keyword,
            None,
            None,
            "needle",
            5,
            FusionWeights::default(),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome.degraded_reasons,
            vec![degraded::VECTOR_UNAVAILABLE.to_string()]
        );
        assert_eq!(outcome.candidates.len(), 1);
    }

    #[tokio::test]
    async fn per_file_dedup_keeps_at_most_two_chunks() {
        let dir = TempDir::new().unwrap();
        let embedder = HashEmbedder::new(DIM);
        let chunks: Vec<IndexedChunk> = (0..5)
            .map(|i| chunk("hot.rs", i, &format!("needle occurrence number {i}")))
            .collect();
        let (keyword, vector) = build_indexes(&dir, &chunks, &embedder).await;

        let outcome = hybrid_search(
            &keyword,
            Some(&vector),
            Some(&embedder),
            "needle occurrence",
            5,
            FusionWeights::default(),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let from_hot = outcome
            .candidates
            .iter()
            .filter(|c| c.path == "hot.rs")
            .count();
        assert_eq!(from_hot, PER_FILE_LIMIT);
    }

    #[tokio::test]
    async fn result_count_is_bounded_by_overfetch() {
        let dir = TempDir::new().unwrap();
        let embedder = HashEmbedder::new(DIM);
        let chunks: Vec<IndexedChunk> = (0..40)
            .map(|i| chunk(&format!("f{i}.rs"), 0, &format!("needle in file {i}")))
            .collect();
        let (keyword, vector) = build_indexes(&dir, &chunks, &embedder).await;

        let k = 5;
        let outcome = hybrid_search(
            &keyword,
            Some(&vector),
            Some(&embedder),
            "needle",
            k,
            FusionWeights::default(),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(outcome.candidates.len() <= k * OVERFETCH_FACTOR);
    }

    #[tokio::test]
    async fn precomputed_query_vector_is_used() {
        let dir = TempDir::new().unwrap();
        let embedder = HashEmbedder::new(DIM);
        let chunks = vec![chunk("a.rs", 0, "alpha beta gamma")];
        let (keyword, vector) = build_indexes(&dir, &chunks, &embedder).await;
        let qv = embedder
            .embed(&["alpha beta".to_string()])
            .await
            .unwrap()
            .remove(0);

        // No embedder passed; the precomputed vector alone drives the
        // vector side, so no degradation is reported.
        let outcome = hybrid_search(
            &keyword,
            Some(&vector),
            None,
            "alpha beta",
            5,
            FusionWeights::default(),
            Some(qv),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(outcome.degraded_reasons.is_empty());
        assert!(outcome.candidates[0].vector_score.is_some());
    }
}
