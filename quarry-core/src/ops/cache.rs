use crate::context::CoreContext;
use crate::error::Result;
use crate::proto::{CacheClearParams, CacheClearResponse, CacheScope, CacheStatusResponse};
use quarry_retrieval::ClearScope;
use tracing::warn;

impl CoreContext {
    /// `cache.clear`.
    pub async fn cache_clear(&self, params: CacheClearParams) -> Result<CacheClearResponse> {
        let mut entries_removed = 0;
        match params.scope {
            CacheScope::ThisProject => {
                let (_, handle) = self.resolve_handle(&params.project, None).await?;
                entries_removed += handle.cache.clear(ClearScope::All);
                persist_quietly(&handle);
            }
            CacheScope::ExpiredOnly => {
                let (_, handle) = self.resolve_handle(&params.project, None).await?;
                entries_removed += handle.cache.clear(ClearScope::ExpiredOnly);
                persist_quietly(&handle);
            }
            CacheScope::All => {
                for project in self.registry.list() {
                    let handle = self.handle(&project).await?;
                    entries_removed += handle.cache.clear(ClearScope::All);
                    persist_quietly(&handle);
                }
            }
        }
        Ok(CacheClearResponse { entries_removed })
    }

    /// `cache.status`.
    pub async fn cache_status(&self, selector: &str) -> Result<CacheStatusResponse> {
        let (project, handle) = self.resolve_handle(selector, None).await?;
        Ok(CacheStatusResponse {
            project_id: project.id,
            status: handle.cache.status(),
        })
    }
}

fn persist_quietly(handle: &crate::context::ProjectHandle) {
    if let Err(err) = handle.cache.persist() {
        warn!("cache persist failed: {err}");
    }
}
