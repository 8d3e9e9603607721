//! # Quarry Symbols
//!
//! Lightweight AST-derived symbol map for supported languages.
//!
//! An extractor per language walks the tree-sitter parse tree and records
//! named definitions; reference lookups re-parse candidate files and match
//! identifier nodes, so names occurring inside strings or comments never
//! count as references.
//!
//! Symbol extraction is best-effort: a file that fails to parse is skipped
//! for symbols only, and keyword/vector indexing of it proceeds unaffected.

mod error;
mod index;
mod lang;

pub use error::SymbolError;
pub use index::Location;
pub use index::SymbolIndex;
pub use lang::Lang;

use serde::{Deserialize, Serialize};

/// Kind of a named definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Trait,
    Interface,
    Module,
    Constant,
    Variable,
    TypeAlias,
}

/// A named definition inside one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub start_line: u32,
    pub end_line: u32,
}
