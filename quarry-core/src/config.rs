use std::path::PathBuf;
use std::time::Duration;

const DATA_DIR_NAME: &str = ".quarry";

/// Remote embedding endpoint settings.
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub dimension: usize,
}

/// Remote LLM endpoint settings (re-rank and answer generation).
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
}

/// Everything the core reads from the environment, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of all per-project index directories and the registry file.
    pub data_dir: PathBuf,

    /// Remote embedding endpoint; absent means local-model fallback.
    pub embedding: Option<EmbeddingSettings>,

    /// Remote LLM endpoint; absent disables re-rank and generation.
    pub llm: Option<LlmSettings>,

    pub embed_timeout: Duration,
    pub llm_timeout: Duration,
    pub catchup_timeout: Duration,

    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub semantic_cache_threshold: f32,
}

impl Config {
    /// Read settings from environment variables, with defaults matching the
    /// documented contract (30 s embed/LLM calls, 5 min catch-up, 1 h cache
    /// TTL, 10 000 cache entries, cosine threshold 0.95).
    pub fn from_env() -> Self {
        let data_dir = std::env::var("QUARRY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(DATA_DIR_NAME)
            });

        let embedding = match (
            std::env::var("QUARRY_EMBEDDING_ENDPOINT"),
            std::env::var("QUARRY_EMBEDDING_MODEL"),
            std::env::var("QUARRY_EMBEDDING_API_KEY"),
        ) {
            (Ok(endpoint), Ok(model), Ok(api_key)) => Some(EmbeddingSettings {
                endpoint,
                model,
                api_key,
                dimension: env_usize("QUARRY_EMBEDDING_DIM", 1536),
            }),
            _ => None,
        };

        let llm = match (
            std::env::var("QUARRY_LLM_ENDPOINT"),
            std::env::var("QUARRY_LLM_MODEL"),
            std::env::var("QUARRY_LLM_API_KEY"),
        ) {
            (Ok(endpoint), Ok(model), Ok(api_key)) => Some(LlmSettings {
                endpoint,
                model,
                api_key,
            }),
            _ => None,
        };

        Self {
            data_dir,
            embedding,
            llm,
            embed_timeout: env_secs("QUARRY_EMBED_TIMEOUT_SECS", 30),
            llm_timeout: env_secs("QUARRY_LLM_TIMEOUT_SECS", 30),
            catchup_timeout: env_secs("QUARRY_CATCHUP_TIMEOUT_SECS", 300),
            cache_ttl: env_secs("QUARRY_CACHE_TTL_SECS", 3600),
            cache_capacity: env_usize("QUARRY_CACHE_CAPACITY", 10_000),
            semantic_cache_threshold: 0.95,
        }
    }

    /// A config rooted at an explicit directory, remote services disabled.
    /// The embedder and LLM can still be injected at context construction.
    pub fn at(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            embedding: None,
            llm: None,
            embed_timeout: Duration::from_secs(30),
            llm_timeout: Duration::from_secs(30),
            catchup_timeout: Duration::from_secs(300),
            cache_ttl: Duration::from_secs(3600),
            cache_capacity: 10_000,
            semantic_cache_threshold: 0.95,
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("projects.json")
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.data_dir.join(project_id)
    }
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
