use crate::context::{rebuild_stores, CoreContext};
use crate::error::Result;
use crate::proto::{IndexStatus, RebuildParams, RebuildResponse};
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;
use tracing::info;

impl CoreContext {
    /// `index.status`: current index counts for one project.
    pub async fn index_status(&self, selector: &str) -> Result<IndexStatus> {
        let (project, handle) = self.resolve_handle(selector, None).await?;
        let stores = handle.stores.read().await;
        let last = handle.last_catchup.load(Ordering::SeqCst);
        Ok(IndexStatus {
            project_id: project.id,
            files_indexed: stores.index.state.len(),
            chunks_indexed: stores.index.keyword.chunk_count(),
            vectors_indexed: stores
                .index
                .vector
                .as_ref()
                .map(|v| v.live_count())
                .unwrap_or(0),
            vector_pending: stores.index.state.vector_pending().len(),
            last_catchup: (last > 0).then_some(last),
            needs_rebuild: handle.needs_rebuild.load(Ordering::SeqCst),
        })
    }

    /// `index.rebuild`: drop all derived rows and re-index the working tree.
    pub async fn index_rebuild(
        &self,
        params: RebuildParams,
        cancel: &CancellationToken,
    ) -> Result<RebuildResponse> {
        let (project, handle) = self.resolve_handle(&params.project, None).await?;
        info!(project = %project.id, drop_vectors = params.drop_vectors, "rebuilding index");

        {
            let mut stores = handle.stores.write().await;
            rebuild_stores(&mut stores, params.drop_vectors);
        }
        handle.needs_rebuild.store(false, Ordering::SeqCst);

        self.catch_up_project(&handle, cancel).await
    }
}
