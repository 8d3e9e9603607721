use super::{lock_parser, name_of};
use crate::SymbolKind;
use once_cell::sync::Lazy;
use std::sync::Mutex;
use tree_sitter::{Node, Parser, Tree};

static PARSER: Lazy<Mutex<Parser>> = Lazy::new(|| {
    let mut parser = Parser::new();
    if let Err(err) = parser.set_language(&tree_sitter_bash::LANGUAGE.into()) {
        panic!("failed to load Bash grammar: {err}");
    }
    Mutex::new(parser)
});

pub(crate) fn parse(source: &str) -> Option<Tree> {
    lock_parser(&PARSER).parse(source, None)
}

pub(crate) fn symbol(node: Node, source: &str, _in_container: bool) -> Option<(String, SymbolKind)> {
    match node.kind() {
        "function_definition" => name_of(node, source).map(|name| (name, SymbolKind::Function)),
        "variable_assignment" if is_top_level(node) => {
            name_of(node, source).map(|name| (name, SymbolKind::Variable))
        }
        _ => None,
    }
}

fn is_top_level(node: Node) -> bool {
    node.parent().map(|p| p.kind() == "program").unwrap_or(false)
}
