use crate::llm::{CompletionOptions, LlmProvider};
use crate::{degraded, Candidate};
use log::{debug, warn};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const MAX_RETRIES: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default per-chunk byte budget when building the prompt.
const DEFAULT_CHUNK_BUDGET: usize = 1200;

/// Default wall-clock ceiling for the whole rerank call.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a rerank: the trimmed candidate list, plus degradations if the
/// LLM could not be used and the fused-score order was kept instead.
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub candidates: Vec<Candidate>,
    pub degraded_reasons: Vec<String>,
}

#[derive(Deserialize)]
struct Selection {
    selected: Vec<SelectedChunk>,
}

#[derive(Deserialize)]
struct SelectedChunk {
    id: String,
    #[serde(default)]
    #[allow(dead_code)]
    reason: String,
}

/// LLM-driven filtering and ordering of a candidate list.
///
/// Fail-open: any failure (network after retries, unparseable output, or the
/// hard timeout) returns the first `final_k` candidates in their fused-score
/// order with the degradation named, never an error.
pub struct Reranker {
    llm: Arc<dyn LlmProvider>,
    chunk_byte_budget: usize,
    timeout: Duration,
}

impl Reranker {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            chunk_byte_budget: DEFAULT_CHUNK_BUDGET,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_limits(mut self, chunk_byte_budget: usize, timeout: Duration) -> Self {
        self.chunk_byte_budget = chunk_byte_budget;
        self.timeout = timeout;
        self
    }

    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        final_k: usize,
    ) -> RerankOutcome {
        if candidates.len() <= final_k {
            return RerankOutcome {
                candidates,
                degraded_reasons: Vec::new(),
            };
        }

        let prompt = self.build_prompt(query, &candidates, final_k);

        let attempt_all = async {
            let mut attempt = 0u32;
            loop {
                match self
                    .llm
                    .complete(&prompt, &CompletionOptions::default())
                    .await
                {
                    Ok(text) => return Ok(text),
                    Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                        warn!(
                            "rerank call failed ({err}), retry {} of {MAX_RETRIES}",
                            attempt + 1
                        );
                        tokio::time::sleep(RETRY_DELAY * (attempt + 1)).await;
                        attempt += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        let response = match tokio::time::timeout(self.timeout, attempt_all).await {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => {
                warn!("rerank unavailable: {err}");
                return fail_open(candidates, final_k, degraded::RERANK_UNAVAILABLE);
            }
            Err(_) => {
                warn!("rerank timed out after {:?}", self.timeout);
                return fail_open(candidates, final_k, degraded::RERANK_TIMEOUT);
            }
        };

        match parse_selection(&response) {
            Some(ids) => {
                // Intersect with the real candidate set; the model sometimes
                // invents ids, and those must not surface.
                let mut picked = Vec::new();
                for id in ids {
                    if picked.len() >= final_k {
                        break;
                    }
                    if let Some(candidate) = candidates.iter().find(|c| c.chunk_id == id) {
                        if !picked.iter().any(|c: &Candidate| c.chunk_id == id) {
                            picked.push(candidate.clone());
                        }
                    }
                }
                if picked.is_empty() {
                    warn!("rerank selected nothing usable, keeping fused order");
                    return fail_open(candidates, final_k, degraded::RERANK_UNAVAILABLE);
                }
                debug!("rerank kept {} of {} candidates", picked.len(), candidates.len());
                RerankOutcome {
                    candidates: picked,
                    degraded_reasons: Vec::new(),
                }
            }
            None => {
                warn!("rerank response was not parseable JSON, keeping fused order");
                fail_open(candidates, final_k, degraded::RERANK_UNAVAILABLE)
            }
        }
    }

    fn build_prompt(&self, query: &str, candidates: &[Candidate], final_k: usize) -> String {
        let mut prompt = String::with_capacity(candidates.len() * (self.chunk_byte_budget + 128));
        prompt.push_str(
            "You rank code-search results. Given a query and candidate code \
             fragments, select the fragments most relevant to the query.\n\n",
        );
        prompt.push_str(&format!("Query: {query}\n\n"));
        prompt.push_str("Candidates:\n");
        for candidate in candidates {
            prompt.push_str(&format!(
                "--- id: {} ({} lines {}-{})\n{}\n",
                candidate.chunk_id,
                candidate.path,
                candidate.start_line,
                candidate.end_line,
                truncate_bytes(&candidate.text, self.chunk_byte_budget),
            ));
        }
        prompt.push_str(&format!(
            "\nRespond with JSON only, at most {final_k} entries, best first:\n\
             {{\"selected\": [{{\"id\": \"<candidate id>\", \"reason\": \"<short justification>\"}}]}}\n",
        ));
        prompt
    }
}

fn fail_open(mut candidates: Vec<Candidate>, final_k: usize, reason: &str) -> RerankOutcome {
    candidates.truncate(final_k);
    RerankOutcome {
        candidates,
        degraded_reasons: vec![reason.to_string()],
    }
}

/// Pull the selection object out of the response, tolerating fences and
/// surrounding prose.
fn parse_selection(response: &str) -> Option<Vec<String>> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    let selection: Selection = serde_json::from_str(&response[start..=end]).ok()?;
    Some(selection.selected.into_iter().map(|s| s.id).collect())
}

/// Cut at a char boundary at or below `budget` bytes.
fn truncate_bytes(text: &str, budget: usize) -> &str {
    if text.len() <= budget {
        return text;
    }
    let mut cut = budget;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedLlm {
        responses: Vec<Result<String, LlmError>>,
        calls: AtomicU32,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn complete(&self, _: &str, _: &CompletionOptions) -> Result<String, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.responses.get(call) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(LlmError::Transient(msg))) => Err(LlmError::Transient(msg.clone())),
                Some(Err(LlmError::Rejected(msg))) => Err(LlmError::Rejected(msg.clone())),
                Some(Err(LlmError::MissingCredentials)) => Err(LlmError::MissingCredentials),
                None => Err(LlmError::Transient("script exhausted".to_string())),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn candidate(id: &str, score: f32) -> Candidate {
        Candidate {
            chunk_id: id.to_string(),
            path: format!("{id}.rs"),
            start_line: 1,
            end_line: 50,
            text: format!("content of {id}"),
            keyword_score: Some(score),
            vector_score: None,
            fused_score: score,
        }
    }

    fn pool() -> Vec<Candidate> {
        vec![
            candidate("p:a.rs:0", 0.9),
            candidate("p:b.rs:0", 0.8),
            candidate("p:c.rs:0", 0.7),
            candidate("p:d.rs:0", 0.6),
        ]
    }

    #[tokio::test]
    async fn keeps_llm_order_and_drops_hallucinated_ids() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(
            "{\"selected\": [\
             {\"id\": \"p:c.rs:0\", \"reason\": \"direct match\"}, \
             {\"id\": \"p:invented.rs:9\", \"reason\": \"made up\"}, \
             {\"id\": \"p:a.rs:0\", \"reason\": \"related\"}]}"
                .to_string(),
        )]));
        let reranker = Reranker::new(llm);

        let outcome = reranker.rerank("query", pool(), 2).await;
        assert!(outcome.degraded_reasons.is_empty());
        let ids: Vec<&str> = outcome.candidates.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["p:c.rs:0", "p:a.rs:0"]);
    }

    #[tokio::test]
    async fn unparseable_response_fails_open_in_fused_order() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok("sorry, no JSON today".to_string())]));
        let reranker = Reranker::new(llm);

        let outcome = reranker.rerank("query", pool(), 2).await;
        assert_eq!(
            outcome.degraded_reasons,
            vec![degraded::RERANK_UNAVAILABLE.to_string()]
        );
        let ids: Vec<&str> = outcome.candidates.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["p:a.rs:0", "p:b.rs:0"]);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_then_fail_open() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Err(LlmError::Transient("one".to_string())),
            Err(LlmError::Transient("two".to_string())),
            Err(LlmError::Transient("three".to_string())),
        ]));
        let reranker = Reranker::new(llm.clone());

        let outcome = reranker.rerank("query", pool(), 3).await;
        assert_eq!(
            outcome.degraded_reasons,
            vec![degraded::RERANK_UNAVAILABLE.to_string()]
        );
        assert_eq!(outcome.candidates.len(), 3);
        // Initial call plus two retries.
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_succeeding_midway_is_not_degraded() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Err(LlmError::Transient("first".to_string())),
            Ok("{\"selected\": [{\"id\": \"p:b.rs:0\", \"reason\": \"r\"}]}".to_string()),
        ]));
        let reranker = Reranker::new(llm);

        let outcome = reranker.rerank("query", pool(), 2).await;
        assert!(outcome.degraded_reasons.is_empty());
        assert_eq!(outcome.candidates[0].chunk_id, "p:b.rs:0");
    }

    #[tokio::test]
    async fn small_candidate_lists_skip_the_llm() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let reranker = Reranker::new(llm.clone());

        let outcome = reranker.rerank("query", pool(), 10).await;
        assert_eq!(outcome.candidates.len(), 4);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo wörld";
        let cut = truncate_bytes(text, 3);
        assert!(cut.len() <= 3);
        assert!(text.starts_with(cut));
    }

    #[test]
    fn parse_selection_tolerates_fences() {
        let response = "```json\n{\"selected\": [{\"id\": \"x\", \"reason\": \"r\"}]}\n```";
        assert_eq!(parse_selection(response), Some(vec!["x".to_string()]));
    }
}
