use crate::context::{CoreContext, ProjectHandle};
use crate::error::{CoreError, Result};
use crate::proto::{GenerateParams, GenerateResponse, SearchParams, SearchResponse};
use quarry_retrieval::{
    degraded, hybrid_search, CachedResult, Candidate, CompletionOptions, FusionWeights, Reranker,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MAX_K: usize = 50;

/// Byte budget per evidence block in the generation prompt.
const EVIDENCE_BYTE_BUDGET: usize = 2000;

impl CoreContext {
    /// `rag.search`: hybrid retrieval with caching and auto catch-up.
    pub async fn rag_search(
        &self,
        params: SearchParams,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse> {
        let k = validate_k(params.k)?;
        let (project, handle) = self
            .resolve_handle(&params.project, params.working_dir.as_deref())
            .await?;

        // An empty query returns an empty candidate list without touching
        // the embedder or LLM.
        if params.query.trim().is_empty() {
            return Ok(SearchResponse {
                project_id: project.id,
                ..Default::default()
            });
        }

        self.ensure_indexed(&handle, params.auto_index, cancel).await?;

        let query_vector = if params.use_vector {
            self.try_embed_query(&handle, &params.query).await
        } else {
            None
        };

        if let Some(hit) = handle.cache.get(&params.query, k, query_vector.as_deref()) {
            return Ok(SearchResponse {
                project_id: project.id,
                candidates: hit.candidates,
                degraded_reasons: hit.degraded_reasons,
                cache_hit: true,
            });
        }

        let weights = FusionWeights {
            keyword: params.keyword_weight.unwrap_or(0.5),
            vector: params.vector_weight.unwrap_or(0.5),
        };

        let stores = handle.stores.read().await;
        let outcome = hybrid_search(
            &stores.index.keyword,
            if params.use_vector {
                stores.index.vector.as_ref()
            } else {
                None
            },
            None,
            &params.query,
            k,
            weights,
            query_vector.clone(),
            cancel,
        )
        .await?;
        drop(stores);

        let mut degraded_reasons = outcome.degraded_reasons;
        if !params.use_vector {
            // The caller opted out of vectors; that is not a degradation.
            degraded_reasons.retain(|r| r != degraded::VECTOR_UNAVAILABLE);
        }

        let mut candidates = outcome.candidates;
        candidates.truncate(k);

        handle.cache.put(
            &params.query,
            k,
            query_vector.as_deref(),
            CachedResult {
                candidates: candidates.clone(),
                answer: None,
                degraded_reasons: degraded_reasons.clone(),
            },
        );
        if let Err(err) = handle.cache.persist() {
            warn!("query cache persist failed: {err}");
        }

        Ok(SearchResponse {
            project_id: project.id,
            candidates,
            degraded_reasons,
            cache_hit: false,
        })
    }

    /// `answer.generate`: retrieval, optional LLM re-rank, optional grounded
    /// prose generation. Every LLM failure degrades instead of erroring.
    pub async fn answer_generate(
        &self,
        params: GenerateParams,
        cancel: &CancellationToken,
    ) -> Result<GenerateResponse> {
        let k = validate_k(params.k)?;
        let (project, handle) = self
            .resolve_handle(&params.project, params.working_dir.as_deref())
            .await?;

        if params.query.trim().is_empty() {
            return Ok(GenerateResponse {
                project_id: project.id,
                ..Default::default()
            });
        }

        self.ensure_indexed(&handle, true, cancel).await?;

        let query_vector = self.try_embed_query(&handle, &params.query).await;

        if let Some(hit) = handle.cache.get(&params.query, k, query_vector.as_deref()) {
            // A cached search result satisfies a generate call only when it
            // already carries the prose the caller asked for.
            if !params.accumulate || hit.answer.is_some() {
                return Ok(GenerateResponse {
                    project_id: project.id,
                    candidates: hit.candidates,
                    answer: hit.answer,
                    degraded_reasons: hit.degraded_reasons,
                    cache_hit: true,
                });
            }
        }

        let stores = handle.stores.read().await;
        let outcome = hybrid_search(
            &stores.index.keyword,
            stores.index.vector.as_ref(),
            None,
            &params.query,
            k,
            FusionWeights::default(),
            query_vector.clone(),
            cancel,
        )
        .await?;
        drop(stores);

        let mut degraded_reasons = outcome.degraded_reasons;
        let pool = outcome.candidates;

        let mut candidates = if params.rerank {
            match &self.llm {
                Some(llm) => {
                    let reranker = Reranker::new(llm.clone())
                        .with_limits(EVIDENCE_BYTE_BUDGET, self.config.llm_timeout);
                    let reranked = reranker.rerank(&params.query, pool, k).await;
                    degraded_reasons.extend(reranked.degraded_reasons);
                    reranked.candidates
                }
                None => {
                    degraded_reasons.push(degraded::RERANK_UNAVAILABLE.to_string());
                    let mut pool = pool;
                    pool.truncate(k);
                    pool
                }
            }
        } else {
            let mut pool = pool;
            pool.truncate(k);
            pool
        };
        candidates.truncate(k);

        let answer = if params.accumulate && !candidates.is_empty() {
            match self.generate_answer(&params.query, &candidates).await {
                Ok(answer) => Some(answer),
                Err(err) => {
                    warn!("answer generation failed: {err}");
                    degraded_reasons.push(degraded::GENERATION_UNAVAILABLE.to_string());
                    None
                }
            }
        } else {
            None
        };

        handle.cache.put(
            &params.query,
            k,
            query_vector.as_deref(),
            CachedResult {
                candidates: candidates.clone(),
                answer: answer.clone(),
                degraded_reasons: degraded_reasons.clone(),
            },
        );
        if let Err(err) = handle.cache.persist() {
            warn!("query cache persist failed: {err}");
        }

        Ok(GenerateResponse {
            project_id: project.id,
            candidates,
            answer,
            degraded_reasons,
            cache_hit: false,
        })
    }

    /// Catch up if asked; otherwise refuse to read a project whose snapshot
    /// was found corrupt and has not been rebuilt yet.
    pub(crate) async fn ensure_indexed(
        &self,
        handle: &Arc<ProjectHandle>,
        auto_index: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if auto_index {
            self.catch_up_project(handle, cancel).await?;
        } else if handle.needs_rebuild.load(Ordering::SeqCst) {
            return Err(CoreError::Corrupt(
                "project index needs rebuild; run index.rebuild or enable auto_index".to_string(),
            ));
        }
        Ok(())
    }

    /// Embed the query once; reused by the semantic cache probe and the
    /// vector search. `None` means the vector side will be degraded.
    pub(crate) async fn try_embed_query(
        &self,
        handle: &Arc<ProjectHandle>,
        query: &str,
    ) -> Option<Vec<f32>> {
        handle.dim?;
        let embedder = self.embedder_for(handle)?;
        let inputs = vec![query.to_string()];
        match embedder.embed(&inputs).await {
            Ok(mut vectors) if !vectors.is_empty() => Some(vectors.remove(0)),
            Ok(_) => None,
            Err(err) => {
                debug!("query embedding failed: {err}");
                None
            }
        }
    }

    async fn generate_answer(&self, query: &str, candidates: &[Candidate]) -> Result<String> {
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| CoreError::Unavailable("no llm provider configured".to_string()))?;

        let mut prompt = String::new();
        prompt.push_str(
            "Answer the question using only the numbered evidence fragments. \
             Cite fragment numbers like [1]. If the evidence is insufficient, say so.\n\n",
        );
        prompt.push_str(&format!("Question: {query}\n\nEvidence:\n"));
        for (i, candidate) in candidates.iter().enumerate() {
            let text = if candidate.text.len() > EVIDENCE_BYTE_BUDGET {
                let mut cut = EVIDENCE_BYTE_BUDGET;
                while cut > 0 && !candidate.text.is_char_boundary(cut) {
                    cut -= 1;
                }
                &candidate.text[..cut]
            } else {
                &candidate.text
            };
            prompt.push_str(&format!(
                "[{}] {} lines {}-{}\n{}\n\n",
                i + 1,
                candidate.path,
                candidate.start_line,
                candidate.end_line,
                text
            ));
        }

        let opts = CompletionOptions {
            max_tokens: 2048,
            temperature: 0.2,
        };
        let answer = tokio::time::timeout(
            self.config.llm_timeout + Duration::from_secs(1),
            llm.complete(&prompt, &opts),
        )
        .await
        .map_err(|_| CoreError::Transient("answer generation timed out".to_string()))?
        .map_err(|err| CoreError::Transient(err.to_string()))?;
        Ok(answer)
    }
}

fn validate_k(k: usize) -> Result<usize> {
    if k == 0 || k > MAX_K {
        return Err(CoreError::InvalidArgument(format!(
            "k must be between 1 and {MAX_K}, got {k}"
        )));
    }
    Ok(k)
}
