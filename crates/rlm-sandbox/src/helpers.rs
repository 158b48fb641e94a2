//! Injected helper functions: `peek`, `grep`, `chunk_indices`, `write_chunks`,
//! `add_buffer`.
//!
//! Ported from `RLMRepl._inject_helpers` in the original daemon. Every
//! helper that reads a file records its mtime into the call's
//! [`DependencyTracker`]; the sandbox merges that into the dependency
//! records of whatever variables/buffers the call produced.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use regex::Regex;
use rlm_watch::is_ignored_name;

use crate::SandboxError;

pub struct DependencyTracker {
    touched: BTreeMap<String, u64>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self { touched: BTreeMap::new() }
    }

    fn record(&mut self, rel: &str, abs_path: &Path) {
        if let Ok(metadata) = fs::metadata(abs_path) {
            if let Ok(modified) = metadata.modified() {
                let secs = modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
                self.touched.insert(rel.to_string(), secs);
            }
        }
    }

    pub fn into_map(self) -> BTreeMap<String, u64> {
        self.touched
    }
}

/// Resolve a sandbox-relative path against `root`, rejecting anything that
/// escapes it after symlink resolution.
fn resolve(root: &Path, rel: &str) -> Result<(PathBuf, String), SandboxError> {
    let candidate = Path::new(rel);
    if candidate.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(SandboxError::PathOutsideRoot(rel.to_string()));
    }
    let abs = root.join(candidate);
    let canonical_root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let canonical = fs::canonicalize(&abs).unwrap_or_else(|_| abs.clone());
    if !canonical.starts_with(&canonical_root) {
        return Err(SandboxError::PathOutsideRoot(rel.to_string()));
    }
    let rel_norm = canonical
        .strip_prefix(&canonical_root)
        .unwrap_or(candidate)
        .to_string_lossy()
        .replace('\\', "/");
    Ok((abs, rel_norm))
}

/// `peek(path, start=1, end=None)`
pub fn peek(root: &Path, tracker: &mut DependencyTracker, path: &str, start: usize, end: Option<usize>) -> Result<String, SandboxError> {
    let (abs, rel) = resolve(root, path)?;
    let text = fs::read_to_string(&abs)?;
    tracker.record(&rel, &abs);

    let lines: Vec<&str> = text.split('\n').collect();
    let start = start.max(1);
    let end = end.unwrap_or(lines.len()).min(lines.len());
    if start > end {
        return Ok(String::new());
    }

    Ok(lines[(start - 1)..end]
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:4} | {}", start + i, line))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// `grep(pattern, path=".", max_results=50)`
pub fn grep(root: &Path, tracker: &mut DependencyTracker, pattern: &str, path: &str, max_results: usize) -> Result<Vec<String>, SandboxError> {
    let re = Regex::new(pattern).map_err(|e| SandboxError::InvalidPattern(e.to_string()))?;
    let (abs_base, _) = resolve(root, path)?;

    let mut out = Vec::new();
    walk_for_grep(root, &abs_base, &re, tracker, &mut out, max_results)?;
    Ok(out)
}

fn walk_for_grep(
    root: &Path,
    dir_or_file: &Path,
    re: &Regex,
    tracker: &mut DependencyTracker,
    out: &mut Vec<String>,
    max_results: usize,
) -> Result<(), SandboxError> {
    if out.len() >= max_results {
        return Ok(());
    }
    let metadata = fs::metadata(dir_or_file)?;
    if metadata.is_file() {
        grep_file(root, dir_or_file, re, tracker, out, max_results);
        return Ok(());
    }

    let mut entries: Vec<_> = fs::read_dir(dir_or_file)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        if out.len() >= max_results {
            break;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if is_ignored_name(&name) {
            continue;
        }
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            walk_for_grep(root, &path, re, tracker, out, max_results)?;
        } else {
            grep_file(root, &path, re, tracker, out, max_results);
        }
    }
    Ok(())
}

fn grep_file(root: &Path, abs_path: &Path, re: &Regex, tracker: &mut DependencyTracker, out: &mut Vec<String>, max_results: usize) {
    let Ok(text) = fs::read_to_string(abs_path) else {
        return;
    };
    let rel = abs_path
        .strip_prefix(root)
        .unwrap_or(abs_path)
        .to_string_lossy()
        .replace('\\', "/");

    for (lineno, line) in text.split('\n').enumerate() {
        if out.len() >= max_results {
            break;
        }
        if re.is_match(line) {
            tracker.record(&rel, abs_path);
            out.push(format!("{rel}:{}:{line}", lineno + 1));
        }
    }
}

/// `chunk_indices(path, size=200, overlap=20)`
pub fn chunk_indices(root: &Path, tracker: &mut DependencyTracker, path: &str, size: usize, overlap: usize) -> Result<Vec<(usize, usize)>, SandboxError> {
    let (abs, rel) = resolve(root, path)?;
    let text = fs::read_to_string(&abs)?;
    tracker.record(&rel, &abs);
    let total_lines = rlm_core::count_lines(&text);
    Ok(rlm_store::chunk_boundaries(total_lines, size, overlap)?)
}

/// `write_chunks(path, out_dir=None, size=200, overlap=20)`
pub fn write_chunks(
    root: &Path,
    tracker: &mut DependencyTracker,
    path: &str,
    out_dir: Option<&Path>,
    size: usize,
    overlap: usize,
) -> Result<Vec<String>, SandboxError> {
    let (abs, rel) = resolve(root, path)?;
    let text = fs::read_to_string(&abs)?;
    tracker.record(&rel, &abs);

    let total_lines = rlm_core::count_lines(&text);
    let boundaries = rlm_store::chunk_boundaries(total_lines, size, overlap)?;
    let lines: Vec<&str> = text.split('\n').collect();

    let target_dir = out_dir.map(PathBuf::from).unwrap_or_else(|| root.join(".claude/rlm_state/chunks"));
    fs::create_dir_all(&target_dir)?;

    let stem = Path::new(path).file_stem().and_then(|s| s.to_str()).unwrap_or("chunk");
    let mut written = Vec::new();
    for (i, (start, end)) in boundaries.iter().enumerate() {
        let body = lines[(start - 1)..*end].join("\n");
        let file_name = format!("{stem}_chunk_{i}.txt");
        let file_path = target_dir.join(&file_name);
        let header = format!("# {path} lines {start}-{end}\n");
        fs::write(&file_path, format!("{header}{body}"))?;
        written.push(file_path.to_string_lossy().to_string());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn peek_formats_line_numbers() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();
        let mut tracker = DependencyTracker::new();
        let out = peek(dir.path(), &mut tracker, "a.txt", 2, Some(3)).unwrap();
        assert_eq!(out, "   2 | two\n   3 | three");
        assert!(tracker.into_map().contains_key("a.txt"));
    }

    #[test]
    fn resolve_rejects_parent_dir_escape() {
        let dir = tempdir().unwrap();
        let mut tracker = DependencyTracker::new();
        assert!(peek(dir.path(), &mut tracker, "../escape.txt", 1, None).is_err());
    }

    #[test]
    fn grep_finds_matches_across_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "# TODO: fix me\nx = 1\n").unwrap();
        let mut tracker = DependencyTracker::new();
        let hits = grep(dir.path(), &mut tracker, "TODO", ".", 50).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].starts_with("a.py:1:"));
    }

    #[test]
    fn write_chunks_materializes_files() {
        let dir = tempdir().unwrap();
        let body = (0..300).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        fs::write(dir.path().join("big.py"), &body).unwrap();
        let mut tracker = DependencyTracker::new();
        let written = write_chunks(dir.path(), &mut tracker, "big.py", None, 200, 20).unwrap();
        assert_eq!(written.len(), 2);
        let content = fs::read_to_string(&written[0]).unwrap();
        assert!(content.starts_with("# big.py lines 1-200"));
    }
}
