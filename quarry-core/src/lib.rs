//! # Quarry Core
//!
//! The operation surface of the retrieval engine: the multi-project
//! registry, the per-project context (indexes, caches, locks), and one
//! typed async operation per tool-protocol entry point.
//!
//! A `CoreContext` is constructed once at startup from configuration and
//! owns every long-lived service; operations borrow it, resolve their
//! project selector, and run under the project's read or write lock. The
//! transport layer that frames these operations over a byte stream lives
//! outside this crate.

mod config;
mod context;
mod error;
mod ops;
mod proto;
mod registry;

pub use config::Config;
pub use config::EmbeddingSettings;
pub use config::LlmSettings;
pub use context::CoreContext;
pub use context::ProjectHandle;
pub use context::ProjectStores;
pub use error::CoreError;
pub use error::Result;
pub use proto::*;
pub use registry::Project;
pub use registry::ProjectRegistry;
