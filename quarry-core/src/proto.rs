use crate::registry::Project;
use quarry_index::ChangeStats;
use quarry_retrieval::{CacheStatus, Candidate};
use quarry_symbols::{Location, Symbol, SymbolKind};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::PathBuf;

fn default_k() -> usize {
    8
}

fn default_true() -> bool {
    true
}

/// `rag.search` parameters.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub project: String,

    /// Caller working directory, used for "auto" project resolution.
    pub working_dir: Option<PathBuf>,

    pub query: String,

    #[serde(default = "default_k")]
    pub k: usize,

    #[serde(default = "default_true")]
    pub use_vector: bool,

    #[serde(default = "default_true")]
    pub auto_index: bool,

    /// Optional per-query fusion weight overrides.
    pub keyword_weight: Option<f32>,
    pub vector_weight: Option<f32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub project_id: String,
    pub candidates: Vec<Candidate>,
    pub degraded_reasons: Vec<String>,
    pub cache_hit: bool,
}

/// `answer.generate` parameters.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerateParams {
    #[serde(default)]
    pub project: String,
    pub working_dir: Option<PathBuf>,
    pub query: String,

    #[serde(default = "default_k")]
    pub k: usize,

    /// Re-rank the candidate pool with the LLM before trimming.
    #[serde(default = "default_true")]
    pub rerank: bool,

    /// Also produce prose grounded in the final candidates.
    #[serde(default)]
    pub accumulate: bool,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub project_id: String,
    pub candidates: Vec<Candidate>,
    pub answer: Option<String>,
    pub degraded_reasons: Vec<String>,
    pub cache_hit: bool,
}

/// `index.status` result.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexStatus {
    pub project_id: String,
    pub files_indexed: usize,
    pub chunks_indexed: usize,
    pub vectors_indexed: usize,
    pub vector_pending: usize,
    pub last_catchup: Option<i64>,
    pub needs_rebuild: bool,
}

/// `index.rebuild` parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RebuildParams {
    #[serde(default)]
    pub project: String,

    /// Also drop and re-embed the vector index.
    #[serde(default)]
    pub drop_vectors: bool,
}

pub type RebuildResponse = ChangeStats;

/// `project.add` parameters.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddProjectParams {
    pub path: PathBuf,
    pub name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectList {
    pub projects: Vec<Project>,
}

/// `cache.clear` / `cache.status` scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheScope {
    ThisProject,
    All,
    ExpiredOnly,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheClearParams {
    #[serde(default)]
    pub project: String,
    pub scope: CacheScope,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CacheClearResponse {
    pub entries_removed: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheStatusResponse {
    pub project_id: String,
    pub status: CacheStatus,
}

/// `code.symbols` parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SymbolsParams {
    #[serde(default)]
    pub project: String,
    pub path: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SymbolsResponse {
    pub symbols: Vec<Symbol>,
}

/// `code.find_symbol` parameters.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FindSymbolParams {
    #[serde(default)]
    pub project: String,
    pub name: String,
    pub kind: Option<SymbolKind>,
}

/// `code.references` parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferencesParams {
    #[serde(default)]
    pub project: String,
    pub name: String,

    #[serde(default = "default_refs_limit")]
    pub limit: usize,
}

fn default_refs_limit() -> usize {
    100
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LocationsResponse {
    pub locations: Vec<Location>,
}

/// `search.pattern` parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatternParams {
    #[serde(default)]
    pub project: String,
    pub pattern: String,

    #[serde(default = "default_pattern_limit")]
    pub limit: usize,
}

fn default_pattern_limit() -> usize {
    200
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub path: String,
    pub line: u32,
    pub text: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PatternResponse {
    pub matches: Vec<PatternMatch>,
    pub truncated: bool,
}

/// `file.read` parameters.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileReadParams {
    #[serde(default)]
    pub project: String,
    pub path: String,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileReadResponse {
    pub path: String,
    pub content: String,
    pub truncated: bool,
}

/// `file.list` parameters.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileListParams {
    #[serde(default)]
    pub project: String,

    /// Directory relative to the project root; the root itself if absent.
    pub dir: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileListResponse {
    pub entries: Vec<FileEntry>,
}

/// `file.find` parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileFindParams {
    #[serde(default)]
    pub project: String,
    pub glob: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileFindResponse {
    pub paths: Vec<String>,
}
