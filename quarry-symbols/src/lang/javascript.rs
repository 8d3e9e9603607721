use super::{lock_parser, name_of};
use crate::SymbolKind;
use once_cell::sync::Lazy;
use std::sync::Mutex;
use tree_sitter::{Node, Parser, Tree};

static PARSER: Lazy<Mutex<Parser>> = Lazy::new(|| {
    let mut parser = Parser::new();
    if let Err(err) = parser.set_language(&tree_sitter_javascript::LANGUAGE.into()) {
        panic!("failed to load JavaScript grammar: {err}");
    }
    Mutex::new(parser)
});

pub(crate) fn parse(source: &str) -> Option<Tree> {
    lock_parser(&PARSER).parse(source, None)
}

pub(crate) fn symbol(node: Node, source: &str, in_class: bool) -> Option<(String, SymbolKind)> {
    match node.kind() {
        "function_declaration" | "generator_function_declaration" => {
            name_of(node, source).map(|name| (name, SymbolKind::Function))
        }
        "method_definition" => name_of(node, source).map(|name| (name, SymbolKind::Method)),
        "class_declaration" => name_of(node, source).map(|name| (name, SymbolKind::Class)),
        "variable_declarator" if !in_class && is_top_level_declarator(node) => {
            let name = node.child_by_field_name("name")?;
            if name.kind() != "identifier" {
                return None;
            }
            name.utf8_text(source.as_bytes())
                .ok()
                .map(|n| (n.to_string(), SymbolKind::Variable))
        }
        _ => None,
    }
}

pub(crate) fn is_top_level_declarator(node: Node) -> bool {
    node.parent()
        .filter(|p| matches!(p.kind(), "lexical_declaration" | "variable_declaration"))
        .and_then(|p| p.parent())
        .map(|g| g.kind() == "program")
        .unwrap_or(false)
}
