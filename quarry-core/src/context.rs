use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::registry::{Project, ProjectRegistry};
use quarry_embeddings::{Embedder, LocalEmbedder, RemoteConfig, RemoteEmbedder};
use quarry_index::{
    catch_up, AuxIndex, CatchUpGate, ChangeStats, IndexState, IndexStores, KeywordIndex,
    VectorIndex,
};
use quarry_retrieval::{
    LlmProvider, OpenAiCompatConfig, OpenAiCompatLlm, QueryCache, QueryCacheConfig,
};
use quarry_symbols::SymbolIndex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The index stack plus the symbol map, guarded together: the write lock is
/// the project-write lock of the concurrency model, the read lock the
/// project-read lock.
pub struct ProjectStores {
    pub index: IndexStores,
    pub symbols: SymbolIndex,
}

/// One open project: its stores, its query cache, and its catch-up gate.
pub struct ProjectHandle {
    pub project: Project,
    pub dir: PathBuf,
    pub stores: RwLock<ProjectStores>,
    pub gate: CatchUpGate,
    pub cache: QueryCache,
    pub needs_rebuild: AtomicBool,
    pub last_catchup: AtomicI64,

    /// Frozen embedding dimension, `None` for embedding-disabled projects.
    pub dim: Option<usize>,
}

/// Explicit long-lived ownership of every service the operations need.
/// Constructed once at startup and passed into each operation; there is no
/// global state.
pub struct CoreContext {
    pub(crate) config: Config,
    pub(crate) registry: ProjectRegistry,
    pub(crate) embedder: Option<Arc<dyn Embedder>>,
    pub(crate) llm: Option<Arc<dyn LlmProvider>>,
    handles: Mutex<HashMap<String, Arc<ProjectHandle>>>,
}

impl CoreContext {
    /// Build providers from configuration: remote embedder when configured,
    /// local model otherwise; LLM only when configured.
    pub fn new(config: Config) -> Result<Self> {
        let embedder: Option<Arc<dyn Embedder>> = match &config.embedding {
            Some(settings) => {
                let remote = RemoteEmbedder::new(RemoteConfig {
                    endpoint: settings.endpoint.clone(),
                    model: settings.model.clone(),
                    api_key: settings.api_key.clone(),
                    dimension: settings.dimension,
                    timeout: config.embed_timeout,
                });
                match remote {
                    Ok(remote) => Some(Arc::new(remote) as Arc<dyn Embedder>),
                    Err(err) => {
                        warn!("remote embedder unavailable ({err}), trying local model");
                        build_local_embedder()
                    }
                }
            }
            None => build_local_embedder(),
        };

        let llm: Option<Arc<dyn LlmProvider>> = match &config.llm {
            Some(settings) => match OpenAiCompatLlm::new(OpenAiCompatConfig {
                endpoint: settings.endpoint.clone(),
                model: settings.model.clone(),
                api_key: settings.api_key.clone(),
                timeout: config.llm_timeout,
            }) {
                Ok(client) => Some(Arc::new(client) as Arc<dyn LlmProvider>),
                Err(err) => {
                    warn!("llm provider unavailable: {err}");
                    None
                }
            },
            None => None,
        };

        Self::with_providers(config, embedder, llm)
    }

    /// Inject providers directly; used by tests and embedding hosts.
    pub fn with_providers(
        config: Config,
        embedder: Option<Arc<dyn Embedder>>,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        let registry = ProjectRegistry::load(&config.registry_path())?;
        Ok(Self {
            config,
            registry,
            embedder,
            llm,
            handles: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open (or fetch the cached handle for) a project's stores.
    pub async fn handle(&self, project: &Project) -> Result<Arc<ProjectHandle>> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(&project.id) {
            return Ok(handle.clone());
        }

        let handle = Arc::new(self.open_handle(project)?);
        handles.insert(project.id.clone(), handle.clone());
        Ok(handle)
    }

    /// Forget a project's handle (used by `project.remove`).
    pub(crate) async fn evict_handle(&self, project_id: &str) {
        self.handles.lock().await.remove(project_id);
    }

    /// The configured embedder, but only if it matches the project's frozen
    /// dimension. A mismatched embedder is as good as absent for that
    /// project: its vectors would be unusable.
    pub(crate) fn embedder_for(&self, handle: &ProjectHandle) -> Option<Arc<dyn Embedder>> {
        let dim = handle.dim?;
        self.embedder
            .as_ref()
            .filter(|e| e.dim() == dim)
            .cloned()
    }

    fn open_handle(&self, project: &Project) -> Result<ProjectHandle> {
        let dir = self.config.project_dir(&project.id);
        fs::create_dir_all(&dir)?;
        let mut needs_rebuild = false;

        let state = recover(&dir.join("state.jsonl"), &mut needs_rebuild, |p| {
            IndexState::load(p).map_err(CoreError::from)
        })?;
        let keyword = recover(&dir.join("keyword.db"), &mut needs_rebuild, |p| {
            KeywordIndex::load(p).map_err(CoreError::from)
        })?;

        let idx_path = dir.join("vector.idx");
        let meta_path = dir.join("vector.meta.jsonl");
        let stored_dim = match VectorIndex::peek_dim(&idx_path) {
            Ok(dim) => dim,
            Err(err) => {
                warn!(
                    "vector index for {} is unreadable ({err}); scheduling rebuild",
                    project.id
                );
                needs_rebuild = true;
                let _ = fs::remove_file(&idx_path);
                let _ = fs::remove_file(&meta_path);
                None
            }
        };
        // The project dimension freezes at index creation: an existing file
        // wins, otherwise the configured embedder decides, otherwise the
        // project is embedding-disabled.
        let dim = stored_dim.or_else(|| self.embedder.as_ref().map(|e| e.dim()));

        let vector = match dim {
            Some(dim) => {
                let loaded = VectorIndex::load(&idx_path, &meta_path, dim);
                match loaded {
                    Ok(vector) => Some(vector),
                    Err(err) => {
                        warn!(
                            "vector index for {} failed to open ({err}); scheduling rebuild",
                            project.id
                        );
                        needs_rebuild = true;
                        let _ = fs::remove_file(&idx_path);
                        let _ = fs::remove_file(&meta_path);
                        Some(VectorIndex::load(&idx_path, &meta_path, dim)?)
                    }
                }
            }
            None => None,
        };

        let symbols = recover(&dir.join("symbols.db"), &mut needs_rebuild, |p| {
            SymbolIndex::load(p).map_err(CoreError::from)
        })?;

        let cache = QueryCache::open(
            &dir,
            &project.id,
            dim,
            QueryCacheConfig {
                ttl: self.config.cache_ttl,
                capacity: self.config.cache_capacity,
                semantic_threshold: self.config.semantic_cache_threshold,
            },
        )
        .map_err(CoreError::from)?;

        if needs_rebuild {
            info!(project = %project.id, "project flagged for rebuild after corrupt snapshot");
        }

        Ok(ProjectHandle {
            project: project.clone(),
            dir,
            stores: RwLock::new(ProjectStores {
                index: IndexStores {
                    state,
                    keyword,
                    vector,
                },
                symbols,
            }),
            gate: CatchUpGate::new(),
            cache,
            needs_rebuild: AtomicBool::new(needs_rebuild),
            last_catchup: AtomicI64::new(0),
            dim,
        })
    }

    /// Run (or join) the project's catch-up, honoring the singleton gate and
    /// the overall deadline. Acquires the project-write lock for the run.
    pub(crate) async fn catch_up_project(
        &self,
        handle: &Arc<ProjectHandle>,
        cancel: &CancellationToken,
    ) -> Result<ChangeStats> {
        let run_handle = handle.clone();
        let embedder = self.embedder_for(handle);
        let cancel = cancel.clone();

        let run = async move {
            let mut stores = run_handle.stores.write().await;
            if run_handle.needs_rebuild.load(Ordering::SeqCst) {
                rebuild_stores(&mut stores, false);
            }

            let ProjectStores { index, symbols } = &mut *stores;
            let mut aux = SymbolAux(symbols);
            let mut aux_list: [&mut dyn AuxIndex; 1] = [&mut aux];
            let stats = catch_up(
                &run_handle.project.id,
                &run_handle.project.root,
                index,
                embedder.as_deref(),
                &mut aux_list,
                &cancel,
            )
            .await?;

            if let Err(err) = stores.symbols.persist() {
                warn!("symbol snapshot persist failed: {err}");
            }
            run_handle.needs_rebuild.store(false, Ordering::SeqCst);
            run_handle
                .last_catchup
                .store(unix_now(), Ordering::SeqCst);
            Ok(stats)
        };

        let deadline = self.config.catchup_timeout;
        match tokio::time::timeout(deadline, handle.gate.run(run)).await {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(err)) => Err(match Arc::try_unwrap(err) {
                Ok(inner) => inner.into(),
                Err(shared) => CoreError::Transient(shared.to_string()),
            }),
            Err(_) => Err(CoreError::Transient(format!(
                "catch-up exceeded {}s deadline",
                deadline.as_secs()
            ))),
        }
    }
}

/// Drop all derived rows so the next catch-up re-indexes from scratch.
pub(crate) fn rebuild_stores(stores: &mut ProjectStores, drop_vectors: bool) {
    stores.index.state.clear();
    stores.index.keyword.rebuild();
    stores.symbols.clear();
    if drop_vectors {
        if let Some(vector) = stores.index.vector.as_mut() {
            vector.rebuild();
        }
    }
}

/// Symbol refresh piggybacking on the catch-up pass. Parse failures inside
/// `update_file` are logged there and skipped; indexing proceeds regardless.
struct SymbolAux<'a>(&'a mut SymbolIndex);

impl AuxIndex for SymbolAux<'_> {
    fn file_indexed(&mut self, path: &str, text: &str) {
        self.0.update_file(path, text);
    }

    fn file_deleted(&mut self, path: &str) {
        self.0.remove_file(path);
    }
}

fn build_local_embedder() -> Option<Arc<dyn Embedder>> {
    match LocalEmbedder::new() {
        Ok(local) => Some(Arc::new(local) as Arc<dyn Embedder>),
        Err(err) => {
            warn!("local embedder unavailable ({err}); vector indexing disabled");
            None
        }
    }
}

fn recover<T>(
    path: &std::path::Path,
    needs_rebuild: &mut bool,
    load: impl Fn(&std::path::Path) -> Result<T>,
) -> Result<T> {
    match load(path) {
        Ok(value) => Ok(value),
        Err(CoreError::Corrupt(msg)) => {
            warn!("{}: {msg}; starting empty and flagging rebuild", path.display());
            *needs_rebuild = true;
            let _ = fs::remove_file(path);
            load(path)
        }
        Err(err) => Err(err),
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
