//! The operation surface: one async method per tool-protocol operation,
//! taking a typed parameter record and returning a typed result record.
//! Every query-path entry point resolves its project selector first.

mod cache;
mod code;
mod files;
mod index;
mod project;
mod search;

use crate::context::{CoreContext, ProjectHandle};
use crate::error::Result;
use crate::registry::Project;
use std::path::Path;
use std::sync::Arc;

impl CoreContext {
    pub(crate) async fn resolve_handle(
        &self,
        selector: &str,
        working_dir: Option<&Path>,
    ) -> Result<(Project, Arc<ProjectHandle>)> {
        let project = self.registry.resolve(selector, working_dir)?;
        let handle = self.handle(&project).await?;
        Ok((project, handle))
    }
}
