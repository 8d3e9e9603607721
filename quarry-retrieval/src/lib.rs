//! # Quarry Retrieval
//!
//! The query-time half of the engine: hybrid keyword + vector search with
//! score fusion and per-file deduplication, LLM re-ranking with fail-open
//! semantics, and the two-tier (exact + semantic) query cache.
//!
//! Every stage degrades rather than fails where it can: a missing embedder
//! turns the search keyword-only, an unreachable re-rank LLM falls back to
//! fused-score order, and each degradation is named in the outcome so
//! callers can tell a best-effort answer from a full one.

mod cache;
mod error;
mod hybrid;
mod llm;
mod rerank;

pub use cache::CacheStatus;
pub use cache::CachedResult;
pub use cache::ClearScope;
pub use cache::QueryCache;
pub use cache::QueryCacheConfig;
pub use error::RetrievalError;
pub use hybrid::hybrid_search;
pub use hybrid::FusionWeights;
pub use hybrid::SearchOutcome;
pub use hybrid::OVERFETCH_FACTOR;
pub use hybrid::PER_FILE_LIMIT;
pub use llm::CompletionOptions;
pub use llm::LlmError;
pub use llm::LlmProvider;
pub use llm::OpenAiCompatLlm;
pub use llm::OpenAiCompatConfig;
pub use rerank::Reranker;
pub use rerank::RerankOutcome;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Degradation reason strings carried in responses.
pub mod degraded {
    pub const EMBEDDER_UNAVAILABLE: &str = "embedder-unavailable";
    pub const VECTOR_UNAVAILABLE: &str = "vector-unavailable";
    pub const RERANK_UNAVAILABLE: &str = "rerank-unavailable";
    pub const RERANK_TIMEOUT: &str = "rerank-timeout";
    pub const GENERATION_UNAVAILABLE: &str = "generation-unavailable";
}

/// A retrieval-time result: a chunk plus its score breakdown.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub chunk_id: String,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,

    /// Normalized keyword score, absent if the chunk only matched vectors.
    pub keyword_score: Option<f32>,

    /// Cosine score, absent if the chunk only matched keywords.
    pub vector_score: Option<f32>,

    /// The combined ranking score.
    pub fused_score: f32,
}
