use super::{lock_parser, name_of};
use crate::SymbolKind;
use once_cell::sync::Lazy;
use std::sync::Mutex;
use tree_sitter::{Node, Parser, Tree};

static PARSER: Lazy<Mutex<Parser>> = Lazy::new(|| {
    let mut parser = Parser::new();
    if let Err(err) = parser.set_language(&tree_sitter_rust::LANGUAGE.into()) {
        panic!("failed to load Rust grammar: {err}");
    }
    Mutex::new(parser)
});

pub(crate) fn parse(source: &str) -> Option<Tree> {
    lock_parser(&PARSER).parse(source, None)
}

pub(crate) fn symbol(node: Node, source: &str, in_impl: bool) -> Option<(String, SymbolKind)> {
    let kind = match node.kind() {
        "function_item" => {
            if in_impl {
                SymbolKind::Method
            } else {
                SymbolKind::Function
            }
        }
        "struct_item" => SymbolKind::Struct,
        "enum_item" => SymbolKind::Enum,
        "trait_item" => SymbolKind::Trait,
        "mod_item" => SymbolKind::Module,
        "const_item" | "static_item" => SymbolKind::Constant,
        "type_item" => SymbolKind::TypeAlias,
        _ => return None,
    };
    name_of(node, source).map(|name| (name, kind))
}
