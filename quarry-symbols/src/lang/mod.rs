use crate::{Symbol, SymbolKind};
use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tree_sitter::{Node, Parser, Tree};

mod go;
mod javascript;
mod python;
mod rust_lang;
mod shell;
mod typescript;

/// Languages the symbol index understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
    Rust,
    Shell,
}

impl Lang {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "py" | "pyi" => Some(Lang::Python),
            "js" | "mjs" | "cjs" | "jsx" => Some(Lang::JavaScript),
            "ts" => Some(Lang::TypeScript),
            "tsx" => Some(Lang::Tsx),
            "go" => Some(Lang::Go),
            "rs" => Some(Lang::Rust),
            "sh" | "bash" | "zsh" => Some(Lang::Shell),
            _ => None,
        }
    }

    fn parse(self, source: &str) -> Option<Tree> {
        match self {
            Lang::Python => python::parse(source),
            Lang::JavaScript => javascript::parse(source),
            Lang::TypeScript => typescript::parse(source),
            Lang::Tsx => typescript::parse_tsx(source),
            Lang::Go => go::parse(source),
            Lang::Rust => rust_lang::parse(source),
            Lang::Shell => shell::parse(source),
        }
    }

    fn symbol_at(self, node: Node, source: &str, in_container: bool) -> Option<(String, SymbolKind)> {
        match self {
            Lang::Python => python::symbol(node, source, in_container),
            Lang::JavaScript => javascript::symbol(node, source, in_container),
            Lang::TypeScript | Lang::Tsx => typescript::symbol(node, source, in_container),
            Lang::Go => go::symbol(node, source, in_container),
            Lang::Rust => rust_lang::symbol(node, source, in_container),
            Lang::Shell => shell::symbol(node, source, in_container),
        }
    }

    /// Node kinds whose descendants count as container members (methods).
    fn container_kinds(self) -> &'static [&'static str] {
        match self {
            Lang::Python => &["class_definition"],
            Lang::JavaScript => &["class_declaration", "class"],
            Lang::TypeScript | Lang::Tsx => {
                &["class_declaration", "class", "abstract_class_declaration"]
            }
            Lang::Go => &[],
            Lang::Rust => &["impl_item", "trait_item"],
            Lang::Shell => &[],
        }
    }

    /// Node kinds that are identifier occurrences for reference search.
    fn identifier_kinds(self) -> &'static [&'static str] {
        match self {
            Lang::Python => &["identifier"],
            Lang::JavaScript => &["identifier", "property_identifier", "shorthand_property_identifier"],
            Lang::TypeScript | Lang::Tsx => {
                &["identifier", "property_identifier", "type_identifier"]
            }
            Lang::Go => &["identifier", "type_identifier", "field_identifier"],
            Lang::Rust => &["identifier", "type_identifier", "field_identifier"],
            Lang::Shell => &["variable_name", "word"],
        }
    }
}

/// Extract named definitions. `None` means the file failed to parse.
pub(crate) fn extract_symbols(lang: Lang, source: &str) -> Option<Vec<Symbol>> {
    let tree = lang.parse(source)?;
    let mut out = Vec::new();
    let mut stack = vec![(tree.root_node(), false)];
    while let Some((node, in_container)) = stack.pop() {
        if let Some((name, kind)) = lang.symbol_at(node, source, in_container) {
            out.push(Symbol {
                name,
                kind,
                start_line: node.start_position().row as u32 + 1,
                end_line: node.end_position().row as u32 + 1,
            });
        }
        let descend_as_container =
            in_container || lang.container_kinds().contains(&node.kind());
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            stack.push((child, descend_as_container));
        }
    }
    out.sort_by_key(|s| (s.start_line, s.name.clone()));
    Some(out)
}

/// Every distinct identifier text in the file. `None` on parse failure.
pub(crate) fn identifier_names(lang: Lang, source: &str) -> Option<BTreeSet<String>> {
    let tree = lang.parse(source)?;
    let kinds = lang.identifier_kinds();
    let mut names = BTreeSet::new();
    let mut stack = vec![tree.root_node()];
    while let Some(node) = stack.pop() {
        if kinds.contains(&node.kind()) {
            if let Ok(text) = node.utf8_text(source.as_bytes()) {
                names.insert(text.to_string());
            }
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            stack.push(child);
        }
    }
    Some(names)
}

/// Line spans of identifier nodes whose text equals `name`, ascending.
///
/// Identifiers are tree nodes, so text inside strings and comments never
/// matches.
pub(crate) fn identifier_lines(lang: Lang, source: &str, name: &str) -> Option<Vec<(u32, u32)>> {
    let tree = lang.parse(source)?;
    let kinds = lang.identifier_kinds();
    let mut lines = Vec::new();
    let mut stack = vec![tree.root_node()];
    while let Some(node) = stack.pop() {
        if kinds.contains(&node.kind()) {
            if let Ok(text) = node.utf8_text(source.as_bytes()) {
                if text == name {
                    lines.push((
                        node.start_position().row as u32 + 1,
                        node.end_position().row as u32 + 1,
                    ));
                }
            }
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            stack.push(child);
        }
    }
    lines.sort_unstable();
    lines.dedup();
    Some(lines)
}

pub(crate) fn lock_parser(parser: &'static Lazy<Mutex<Parser>>) -> MutexGuard<'static, Parser> {
    match parser.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn name_of(node: Node, source: &str) -> Option<String> {
    node.child_by_field_name("name")
        .and_then(|n| n.utf8_text(source.as_bytes()).ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
