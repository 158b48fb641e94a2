//! AST walking and signature extraction — the heart of `squeeze()`.
//!
//! Ported from the original `squeezer.py`'s node allow-list and
//! signature-extraction rules (see SPEC_FULL.md §5.A) onto `tree_sitter::Node`.

use tree_sitter::Node;

use crate::language::Language;

/// One extracted structural element.
#[derive(Debug, Clone)]
pub struct SkeletonNode {
    pub signature: String,
    pub start_line: usize,
    pub end_line: usize,
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    /// Function/method-like: signature runs to the header's closing brace or
    /// colon, capped at four lines.
    Function,
    /// Class-like: the first source line only.
    Class,
    /// `export` statements: first line, `...` appended if the statement
    /// continues further.
    Export,
}

/// `(node kind, extraction style)` allow-list for one language.
fn node_table(lang: Language) -> &'static [(&'static str, Style)] {
    match lang {
        Language::Python => &[
            ("class_definition", Style::Class),
            ("function_definition", Style::Function),
        ],
        Language::JavaScript => &[
            ("class_declaration", Style::Class),
            ("function_declaration", Style::Function),
            ("method_definition", Style::Function),
            ("arrow_function", Style::Function),
            ("export_statement", Style::Export),
        ],
        Language::TypeScript | Language::Tsx => &[
            ("class_declaration", Style::Class),
            ("function_declaration", Style::Function),
            ("method_definition", Style::Function),
            ("interface_declaration", Style::Class),
            ("type_alias_declaration", Style::Class),
            ("enum_declaration", Style::Class),
            ("arrow_function", Style::Function),
            ("export_statement", Style::Export),
        ],
        Language::Go => &[
            ("function_declaration", Style::Function),
            ("method_declaration", Style::Function),
            ("type_declaration", Style::Class),
            ("interface_type", Style::Class),
            ("struct_type", Style::Class),
        ],
        Language::Rust => &[
            ("function_item", Style::Function),
            ("impl_item", Style::Class),
            ("struct_item", Style::Class),
            ("enum_item", Style::Class),
            ("trait_item", Style::Class),
            ("type_item", Style::Class),
        ],
        Language::Java => &[
            ("class_declaration", Style::Class),
            ("method_declaration", Style::Function),
            ("interface_declaration", Style::Class),
            ("enum_declaration", Style::Class),
            ("constructor_declaration", Style::Function),
        ],
        Language::C => &[
            ("function_definition", Style::Function),
            ("struct_specifier", Style::Class),
            ("enum_specifier", Style::Class),
            ("type_definition", Style::Class),
            ("declaration", Style::Class),
        ],
        Language::Cpp => &[
            ("function_definition", Style::Function),
            ("class_specifier", Style::Class),
            ("struct_specifier", Style::Class),
            ("enum_specifier", Style::Class),
            ("namespace_definition", Style::Class),
            ("template_declaration", Style::Class),
        ],
    }
}

fn style_for(lang: Language, kind: &str) -> Option<Style> {
    node_table(lang).iter().find(|(k, _)| *k == kind).map(|(_, s)| *s)
}

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

/// Column of `node`'s start within its own line (used to indent a docstring
/// under a python function signature).
fn indent_of(node: Node, source: &str) -> usize {
    let start = node.start_byte();
    let line_start = source[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    start - line_start
}

fn extract_python_function(node: Node, source: &str) -> String {
    let text = node_text(node, source);
    let mut sig_lines: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        let trimmed = line.trim_end();
        sig_lines.push(trimmed);
        let has_close_paren_colon = line.contains(':') && line.contains("):");
        if has_close_paren_colon || trimmed.ends_with(':') {
            break;
        }
    }
    let sig = sig_lines.join("\n");

    // Append a leading docstring, if the first body statement is a bare
    // string-literal expression.
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "block" {
            continue;
        }
        let mut body_cursor = child.walk();
        for stmt in child.children(&mut body_cursor) {
            if stmt.kind() != "expression_statement" {
                continue;
            }
            let mut expr_cursor = stmt.walk();
            for expr in stmt.children(&mut expr_cursor) {
                if expr.kind() == "string" {
                    let mut doc = node_text(expr, source).trim().to_string();
                    let doc_lines: Vec<&str> = doc.split('\n').collect();
                    if doc_lines.len() > 3 {
                        doc = format!("{}\n    ...\"\"\"", doc_lines[..3].join("\n"));
                    }
                    let indent = " ".repeat(indent_of(node, source));
                    return format!("{sig}\n{indent}    {doc}");
                }
            }
            break;
        }
        break;
    }
    sig
}

fn extract_generic_function(node: Node, source: &str) -> String {
    let text = node_text(node, source);
    let lines: Vec<&str> = text.split('\n').collect();
    let mut first_line = lines[0].trim_end().to_string();

    if !first_line.contains('{') && lines.len() > 1 {
        for (i, line) in lines[1..].iter().enumerate() {
            let i = i + 1; // matches python's enumerate(lines[1:], 1)
            first_line.push('\n');
            first_line.push_str(line.trim_end());
            if line.contains('{') {
                break;
            }
            if i >= 3 {
                first_line.push_str("\n    ...");
                break;
            }
        }
    }
    first_line
}

fn extract_class(node: Node, source: &str) -> String {
    node_text(node, source).split('\n').next().unwrap_or("").trim_end().to_string()
}

fn extract_export(node: Node, source: &str) -> String {
    let text = node_text(node, source);
    let mut lines = text.split('\n');
    let first = lines.next().unwrap_or("").trim_end().to_string();
    if lines.next().is_some() {
        format!("{first} ...")
    } else {
        first
    }
}

fn extract_signature(node: Node, source: &str, lang: Language, style: Style) -> Option<String> {
    let sig = match (lang, style) {
        (Language::Python, Style::Function) => extract_python_function(node, source),
        (_, Style::Function) => extract_generic_function(node, source),
        (_, Style::Class) => extract_class(node, source),
        (_, Style::Export) => extract_export(node, source),
    };
    if sig.is_empty() {
        None
    } else {
        Some(sig)
    }
}

/// Depth-first walk collecting every allow-listed node.
///
/// A matched node is still recursed into afterward, so nested methods
/// inside a class (or nested functions) are emitted too, at `depth + 1`.
pub fn walk_for_skeletons(root: Node, source: &str, lang: Language) -> Vec<SkeletonNode> {
    let mut out = Vec::new();
    walk(root, source, lang, 0, &mut out);
    out
}

fn walk(node: Node, source: &str, lang: Language, depth: usize, out: &mut Vec<SkeletonNode>) {
    let next_depth = if let Some(style) = style_for(lang, node.kind()) {
        if let Some(signature) = extract_signature(node, source, lang, style) {
            out.push(SkeletonNode {
                signature,
                start_line: node.start_position().row + 1,
                end_line: node.end_position().row + 1,
                depth,
            });
        }
        depth + 1
    } else {
        depth
    };

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, source, lang, next_depth, out);
    }
}

/// Count lines the way the original daemon does: `\n` count, plus one more
/// if the source is non-empty and doesn't end on a newline.
pub fn count_lines(source: &str) -> usize {
    let newlines = source.matches('\n').count();
    if !source.is_empty() && !source.ends_with('\n') {
        newlines + 1
    } else {
        newlines
    }
}

/// Assemble the final skeleton text from a file name, its extracted nodes,
/// and the source's total line count.
pub fn assemble(display_name: &str, nodes: &[SkeletonNode], total_lines: usize) -> String {
    if nodes.is_empty() {
        return format!("# {display_name} — no structural elements found ({total_lines} lines)");
    }

    let mut lines = vec![format!("# {display_name} — {} symbols, {total_lines} lines", nodes.len())];
    for node in nodes {
        let indent = "  ".repeat(node.depth);
        let mut sig_lines = node.signature.split('\n');
        let first = sig_lines.next().unwrap_or("");
        lines.push(format!("{indent}{first}  # L{}-{}", node.start_line, node.end_line));
        for extra in sig_lines {
            lines.push(format!("{indent}{extra}"));
        }
        lines.push(format!("{indent}    ..."));
        lines.push(String::new());
    }
    lines.join("\n")
}
