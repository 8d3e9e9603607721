use super::{lock_parser, name_of};
use crate::SymbolKind;
use once_cell::sync::Lazy;
use std::sync::Mutex;
use tree_sitter::{Node, Parser, Tree};

static PARSER: Lazy<Mutex<Parser>> = Lazy::new(|| {
    let mut parser = Parser::new();
    if let Err(err) = parser.set_language(&tree_sitter_python::LANGUAGE.into()) {
        panic!("failed to load Python grammar: {err}");
    }
    Mutex::new(parser)
});

pub(crate) fn parse(source: &str) -> Option<Tree> {
    lock_parser(&PARSER).parse(source, None)
}

pub(crate) fn symbol(node: Node, source: &str, in_class: bool) -> Option<(String, SymbolKind)> {
    match node.kind() {
        "function_definition" => {
            let kind = if in_class {
                SymbolKind::Method
            } else {
                SymbolKind::Function
            };
            name_of(node, source).map(|name| (name, kind))
        }
        "class_definition" => name_of(node, source).map(|name| (name, SymbolKind::Class)),
        "assignment" if !in_class && is_module_level(node) => {
            let left = node.child_by_field_name("left")?;
            if left.kind() != "identifier" {
                return None;
            }
            left.utf8_text(source.as_bytes())
                .ok()
                .map(|name| (name.to_string(), SymbolKind::Variable))
        }
        _ => None,
    }
}

fn is_module_level(node: Node) -> bool {
    node.parent()
        .filter(|p| p.kind() == "expression_statement")
        .and_then(|p| p.parent())
        .map(|g| g.kind() == "module")
        .unwrap_or(false)
}
