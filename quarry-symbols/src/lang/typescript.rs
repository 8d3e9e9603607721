use super::javascript::is_top_level_declarator;
use super::{lock_parser, name_of};
use crate::SymbolKind;
use once_cell::sync::Lazy;
use std::sync::Mutex;
use tree_sitter::{Node, Parser, Tree};

static PARSER: Lazy<Mutex<Parser>> = Lazy::new(|| {
    let mut parser = Parser::new();
    if let Err(err) = parser.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()) {
        panic!("failed to load TypeScript grammar: {err}");
    }
    Mutex::new(parser)
});

static TSX_PARSER: Lazy<Mutex<Parser>> = Lazy::new(|| {
    let mut parser = Parser::new();
    if let Err(err) = parser.set_language(&tree_sitter_typescript::LANGUAGE_TSX.into()) {
        panic!("failed to load TSX grammar: {err}");
    }
    Mutex::new(parser)
});

pub(crate) fn parse(source: &str) -> Option<Tree> {
    lock_parser(&PARSER).parse(source, None)
}

pub(crate) fn parse_tsx(source: &str) -> Option<Tree> {
    lock_parser(&TSX_PARSER).parse(source, None)
}

pub(crate) fn symbol(node: Node, source: &str, in_class: bool) -> Option<(String, SymbolKind)> {
    match node.kind() {
        "function_declaration" | "generator_function_declaration" => {
            name_of(node, source).map(|name| (name, SymbolKind::Function))
        }
        "method_definition" => name_of(node, source).map(|name| (name, SymbolKind::Method)),
        "class_declaration" | "abstract_class_declaration" => {
            name_of(node, source).map(|name| (name, SymbolKind::Class))
        }
        "interface_declaration" => name_of(node, source).map(|name| (name, SymbolKind::Interface)),
        "enum_declaration" => name_of(node, source).map(|name| (name, SymbolKind::Enum)),
        "type_alias_declaration" => {
            name_of(node, source).map(|name| (name, SymbolKind::TypeAlias))
        }
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
