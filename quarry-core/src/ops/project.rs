use crate::context::CoreContext;
use crate::error::Result;
use crate::proto::{AddProjectParams, ProjectList};
use crate::registry::Project;
use tracing::{info, warn};

impl CoreContext {
    /// `project.add`: register a working tree. Indexing happens lazily on
    /// the first search (or an explicit `index.rebuild`).
    pub fn project_add(&self, params: AddProjectParams) -> Result<Project> {
        self.registry.add(params.name.as_deref(), &params.path)
    }

    /// `project.activate`.
    pub fn project_activate(&self, selector: &str) -> Result<Project> {
        self.registry.activate(selector)
    }

    /// `project.remove`: drop the record and purge every derived index file.
    /// Takes the project-write lock so no in-flight read sees files vanish.
    pub async fn project_remove(&self, selector: &str) -> Result<Project> {
        let (project, handle) = self.resolve_handle(selector, None).await?;

        let _write = handle.stores.write().await;
        let removed = self.registry.remove(&project.id)?;
        self.evict_handle(&project.id).await;

        let dir = self.config.project_dir(&project.id);
        if let Err(err) = std::fs::remove_dir_all(&dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to purge {}: {err}", dir.display());
            }
        }
        info!(project = %project.id, "project removed and indexes purged");
        Ok(removed)
    }

    /// `project.list`.
    pub fn project_list(&self) -> ProjectList {
        ProjectList {
            projects: self.registry.list(),
        }
    }
}
