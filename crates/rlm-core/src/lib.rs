//! Multi-language AST skeletonizer and symbol locator.
//!
//! ARCHITECTURE: this crate has no knowledge of the daemon, the chunk store,
//! or the wire protocol above it. It answers exactly two questions about a
//! source file: "what is its structural skeleton" (`squeeze`) and "where is
//! symbol X defined" (`find_symbol`). Everything else in the workspace is
//! built on top of these two primitives.

mod fallback;
mod language;
mod skeleton;
mod symbol;

pub use fallback::fallback_squeeze;
pub use language::{available_languages, is_available, Language, Parser};
pub use skeleton::{count_lines, SkeletonNode};
pub use symbol::{find_definition, SymbolSpan};

/// Errors produced while parsing or skeletonizing a file.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unsupported language for {0:?}")]
    UnsupportedLanguage(std::path::PathBuf),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error(transparent)]
    TreeSitterLanguage(#[from] tree_sitter::LanguageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Build a structural skeleton for one file's source.
///
/// # Arguments
/// * `display_name` — the name shown in the skeleton's header line (typically
///   a path relative to the project root).
/// * `source` — the file's full text.
/// * `language` — the grammar to parse `source` with.
///
/// # Errors
/// Returns [`CoreError::ParseError`] if tree-sitter's incremental parser
/// refuses the source outright (this is rare; tree-sitter tolerates syntax
/// errors and produces a best-effort tree in almost every case).
///
/// # Examples
/// ```
/// use rlm_core::{squeeze, Language};
/// let out = squeeze("demo.py", "def f():\n    pass\n", Language::Python).unwrap();
/// assert!(out.contains("def f():"));
/// ```
pub fn squeeze(display_name: &str, source: &str, language: Language) -> Result<String> {
    let mut parser = Parser::new(language)?;
    let tree = parser.parse(source)?;
    let nodes = skeleton::walk_for_skeletons(tree.root_node(), source, language);
    Ok(skeleton::assemble(display_name, &nodes, skeleton::count_lines(source)))
}

/// Squeeze a file whose language is detected from its path, falling back to
/// a plain-text preview when no grammar is registered for the extension.
pub fn squeeze_path(display_name: &str, path: &std::path::Path, source_bytes: &[u8]) -> Result<String> {
    match Language::from_path(path) {
        Some(lang) => {
            let text = std::str::from_utf8(source_bytes)?;
            squeeze(display_name, text, lang)
        }
        None => Ok(fallback::fallback_squeeze(display_name, source_bytes)),
    }
}

/// Locate `name`'s definition inside `source`, returning its 1-indexed line
/// span.
///
/// # Errors
/// Returns [`CoreError::ParseError`] under the same rare conditions as
/// [`squeeze`].
pub fn find_symbol(source: &str, language: Language, name: &str) -> Result<Option<SymbolSpan>> {
    let mut parser = Parser::new(language)?;
    let tree = parser.parse(source)?;
    Ok(symbol::find_definition(tree.root_node(), source, name, language))
}

/// The crate's version, for the daemon's `status` action.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Display names of every language with a loaded grammar.
pub fn supported_languages() -> Vec<&'static str> {
    Language::ALL.iter().map(|l| l.name()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squeezes_python_function_with_docstring() {
        let src = "def greet(name):\n    \"\"\"Say hello.\"\"\"\n    print(name)\n";
        let out = squeeze("greet.py", src, Language::Python).unwrap();
        assert!(out.contains("1 symbols"));
        assert!(out.contains("def greet(name):"));
        assert!(out.contains("Say hello."));
    }

    #[test]
    fn squeezes_rust_struct_and_impl() {
        let src = "struct Foo {\n    x: i32,\n}\n\nimpl Foo {\n    fn bar(&self) -> i32 {\n        self.x\n    }\n}\n";
        let out = squeeze("foo.rs", src, Language::Rust).unwrap();
        assert!(out.contains("struct Foo {"));
        assert!(out.contains("impl Foo {"));
        assert!(out.contains("fn bar(&self) -> i32 {"));
    }

    #[test]
    fn no_structural_elements_reports_line_count() {
        let src = "x = 1\ny = 2\n";
        let out = squeeze("vars.py", src, Language::Python).unwrap();
        assert!(out.contains("no structural elements found (2 lines)"));
    }

    #[test]
    fn finds_a_top_level_function() {
        let src = "def target():\n    pass\n\ndef other():\n    pass\n";
        let span = find_symbol(src, Language::Python, "target").unwrap().unwrap();
        assert_eq!(span.start_line, 1);
    }

    #[test]
    fn missing_symbol_returns_none() {
        let src = "def other():\n    pass\n";
        assert!(find_symbol(src, Language::Python, "target").unwrap().is_none());
    }

    #[test]
    fn squeeze_path_falls_back_for_unknown_extension() {
        let out = squeeze_path("notes.txt", std::path::Path::new("notes.txt"), b"hello\nworld\n").unwrap();
        assert!(out.contains("no grammar available"));
    }
}
