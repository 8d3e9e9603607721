use super::{lock_parser, name_of};
use crate::SymbolKind;
use once_cell::sync::Lazy;
use std::sync::Mutex;
use tree_sitter::{Node, Parser, Tree};

static PARSER: Lazy<Mutex<Parser>> = Lazy::new(|| {
    let mut parser = Parser::new();
    if let Err(err) = parser.set_language(&tree_sitter_go::LANGUAGE.into()) {
        panic!("failed to load Go grammar: {err}");
    }
    Mutex::new(parser)
});

pub(crate) fn parse(source: &str) -> Option<Tree> {
    lock_parser(&PARSER).parse(source, None)
}

pub(crate) fn symbol(node: Node, source: &str, _in_container: bool) -> Option<(String, SymbolKind)> {
    match node.kind() {
        "function_declaration" => name_of(node, source).map(|name| (name, SymbolKind::Function)),
        "method_declaration" => name_of(node, source).map(|name| (name, SymbolKind::Method)),
        "type_spec" => {
            let kind = match node.child_by_field_name("type").map(|t| t.kind()) {
                Some("struct_type") => SymbolKind::Struct,
                Some("interface_type") => SymbolKind::Interface,
                _ => SymbolKind::TypeAlias,
            };
            name_of(node, source).map(|name| (name, kind))
        }
        "const_spec" => name_of(node, source).map(|name| (name, SymbolKind::Constant)),
        "var_spec" if is_top_level_var(node) => {
            name_of(node, source).map(|name| (name, SymbolKind::Variable))
        }
        _ => None,
    }
}

fn is_top_level_var(node: Node) -> bool {
    node.parent()
        .filter(|p| p.kind() == "var_declaration")
        .and_then(|p| p.parent())
        .map(|g| g.kind() == "source_file")
        .unwrap_or(false)
}
