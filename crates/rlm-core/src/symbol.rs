//! `find_symbol`: locate a named symbol's line range inside a parsed tree.
//!
//! Ported from `_find_symbol_in_tree`/`_find_symbol_python_ast` in the
//! original daemon (see SPEC_FULL.md §5.B). Tree-sitter gives us a single
//! strategy for every language, so the python-specific `ast`-module fallback
//! collapses into the generic identifier search restricted to
//! function/class-like nodes.

use tree_sitter::Node;

use crate::language::Language;

const IDENTIFIER_KINDS: &[&str] = &["identifier", "name", "type_identifier", "property_identifier"];

/// A located symbol's span, 1-indexed and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolSpan {
    pub start_line: usize,
    pub end_line: usize,
}

/// Search `root` depth-first for a node whose immediate child is an
/// identifier-like node with text equal to `name`.
///
/// At each node, its *direct* children are checked first; only if none of
/// them match does the search recurse into the children's subtrees. This
/// means the outermost node that merely declares the name wins, not the
/// deepest one — e.g. a class whose name matches beats a method inside it
/// that happens to reference the same identifier elsewhere.
pub fn find_symbol(root: Node, source: &str, name: &str) -> Option<SymbolSpan> {
    find_in_tree(root, source, name)
}

fn find_in_tree(node: Node, source: &str, name: &str) -> Option<SymbolSpan> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if IDENTIFIER_KINDS.contains(&child.kind()) {
            if let Some(text) = source.get(child.start_byte()..child.end_byte()) {
                if text == name {
                    return Some(SymbolSpan {
                        start_line: node.start_position().row + 1,
                        end_line: node.end_position().row + 1,
                    });
                }
            }
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(span) = find_in_tree(child, source, name) {
            return Some(span);
        }
    }
    None
}

/// Restricted fallback used only when the generic search above finds
/// nothing in a python file: function and class definitions only, mirroring
/// what `ast.walk` would see (as opposed to every identifier in the tree,
/// e.g. a variable reference).
const PYTHON_DEFINITION_KINDS: &[&str] = &["function_definition", "class_definition"];

/// `find_symbol`, with python's second narrower pass applied on a miss, per
/// spec.md §4.B: the generic identifier-child search always runs first; only
/// for python, and only if that search comes up empty, a second pass
/// restricted to function/class definitions is attempted.
pub fn find_definition(root: Node, source: &str, name: &str, lang: Language) -> Option<SymbolSpan> {
    if let Some(span) = find_symbol(root, source, name) {
        return Some(span);
    }
    if lang == Language::Python {
        return find_definition_node(root, source, name, PYTHON_DEFINITION_KINDS);
    }
    None
}

fn find_definition_node(node: Node, source: &str, name: &str, kinds: &[&str]) -> Option<SymbolSpan> {
    if kinds.contains(&node.kind()) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "identifier" {
                if let Some(text) = source.get(child.start_byte()..child.end_byte()) {
                    if text == name {
                        return Some(SymbolSpan {
                            start_line: node.start_position().row + 1,
                            end_line: node.end_position().row + 1,
                        });
                    }
                }
            }
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(span) = find_definition_node(child, source, name, kinds) {
            return Some(span);
        }
    }
    None
}
