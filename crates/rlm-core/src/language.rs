//! Language detection and grammar loading
//!
//! ARCHITECTURE: This is the ONLY module that maps `Language` to tree-sitter
//! grammars. Adding a language means adding a variant here, a grammar
//! dependency in Cargo.toml, and a node allow-list in `skeleton.rs`.

use std::path::{Component, Path};
use std::sync::OnceLock;

use crate::{CoreError, Result};

/// A supported source language.
///
/// `TypeScript` and `Tsx` share one grammar crate (`tree-sitter-typescript`
/// exposes two distinct language functions) but are kept as separate
/// variants because their node allow-lists and extensions differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
    Rust,
    Java,
    C,
    Cpp,
}

impl Language {
    /// All languages the registry knows about, in a stable order.
    pub const ALL: [Language; 9] = [
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Tsx,
        Language::Go,
        Language::Rust,
        Language::Java,
        Language::C,
        Language::Cpp,
    ];

    /// Detect a language from a bare extension (no leading dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "py" | "pyi" => Some(Self::Python),
            "js" | "jsx" => Some(Self::JavaScript),
            "ts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "go" => Some(Self::Go),
            "rs" => Some(Self::Rust),
            "java" => Some(Self::Java),
            "c" | "h" => Some(Self::C),
            "cpp" | "cc" | "cxx" | "hpp" => Some(Self::Cpp),
            _ => None,
        }
    }

    /// Detect a language from a file path.
    ///
    /// Rejects paths containing `..` components, the same defense in depth
    /// the teacher's `Language::from_path` applies; the daemon's own path
    /// confinement (`rlm-daemon`) is the authoritative guard for client
    /// requests, but the library does not trust callers either.
    pub fn from_path(path: &Path) -> Option<Self> {
        for component in path.components() {
            if matches!(component, Component::ParentDir) {
                return None;
            }
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Canonical display name (used by the `status` action's language list).
    pub fn name(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
        }
    }

    fn to_tree_sitter(self) -> tree_sitter::Language {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Java => tree_sitter_java::LANGUAGE.into(),
            Self::C => tree_sitter_c::LANGUAGE.into(),
            Self::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        }
    }
}

/// One-shot-per-language availability probe.
///
/// Every grammar in this workspace is compiled in unconditionally, so in
/// practice this always reports available; the indirection exists so the
/// `status` action reports a live set instead of a hardcoded one, per the
/// "Grammar availability" design note — a future build that makes grammars
/// optional features only has to change this function.
fn availability_cell() -> &'static [OnceLock<bool>; 9] {
    static CELLS: [OnceLock<bool>; 9] = [
        OnceLock::new(),
        OnceLock::new(),
        OnceLock::new(),
        OnceLock::new(),
        OnceLock::new(),
        OnceLock::new(),
        OnceLock::new(),
        OnceLock::new(),
        OnceLock::new(),
    ];
    &CELLS
}

fn index_of(language: Language) -> usize {
    Language::ALL
        .iter()
        .position(|l| *l == language)
        .unwrap_or(0)
}

/// Is a grammar available for `language`?
pub fn is_available(language: Language) -> bool {
    let idx = index_of(language);
    *availability_cell()[idx].get_or_init(|| tree_sitter::Parser::new().set_language(&language.to_tree_sitter()).is_ok())
}

/// The languages the registry currently has a working grammar for.
pub fn available_languages() -> Vec<Language> {
    Language::ALL.into_iter().filter(|l| is_available(*l)).collect()
}

/// A tree-sitter parser bound to one language.
pub struct Parser {
    language: Language,
    inner: tree_sitter::Parser,
}

impl Parser {
    pub fn new(language: Language) -> Result<Self> {
        let mut inner = tree_sitter::Parser::new();
        inner.set_language(&language.to_tree_sitter())?;
        Ok(Self { language, inner })
    }

    pub fn parse(&mut self, source: &str) -> Result<tree_sitter::Tree> {
        self.inner
            .parse(source, None)
            .ok_or_else(|| CoreError::ParseError(format!("failed to parse {} source", self.language.name())))
    }

    pub fn language(&self) -> Language {
        self.language
    }
}
