//! Directory tree listing and skeleton-backed symbol search.
//!
//! Ported from `rlm_daemon.py`'s `build_tree`/`search_symbols`: same
//! case-insensitive directories-then-files sort, the same depth cutoff that
//! collapses to a child count past `max_depth`, and the 10-line/50-file
//! search caps.

use std::fs;
use std::path::{Path, PathBuf};

use rlm_store::SkeletonCache;
use rlm_watch::is_ignored_name;
use serde_json::{json, Value};

const SEARCH_MAX_LINES_PER_FILE: usize = 10;
const SEARCH_MAX_FILES: usize = 50;

fn display_path(root: &Path, abs: &Path) -> String {
    abs.strip_prefix(root)
        .unwrap_or(abs)
        .to_string_lossy()
        .replace('\\', "/")
}

/// List `root/rel`'s subtree as a nested JSON-shaped value tree, collapsing
/// directories past `max_depth` to a bare child count.
///
/// Permission-denied directories contribute an empty entry list rather than
/// failing the whole listing.
pub fn tree(root: &Path, rel: &Path, max_depth: usize) -> Vec<Value> {
    list_dir(root, &root.join(rel), 0, max_depth)
}

fn list_dir(root: &Path, abs_dir: &Path, depth: usize, max_depth: usize) -> Vec<Value> {
    let Ok(read_dir) = fs::read_dir(abs_dir) else {
        return Vec::new();
    };

    let mut entries: Vec<(String, PathBuf, bool)> = read_dir
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            if is_ignored_name(&name) {
                return None;
            }
            let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
            Some((name, e.path(), is_dir))
        })
        .collect();

    entries.sort_by(|a, b| {
        // directories first, then case-insensitive name
        b.2.cmp(&a.2).then_with(|| a.0.to_lowercase().cmp(&b.0.to_lowercase()))
    });

    entries
        .into_iter()
        .map(|(name, path, is_dir)| {
            let rel_path = display_path(root, &path);
            if is_dir {
                let child_count = fs::read_dir(&path)
                    .map(|rd| {
                        rd.filter_map(|e| e.ok())
                            .filter(|e| {
                                let n = e.file_name().to_string_lossy().to_string();
                                !is_ignored_name(&n)
                            })
                            .count()
                    })
                    .unwrap_or(0);

                if depth < max_depth {
                    let children = list_dir(root, &path, depth + 1, max_depth);
                    json!({
                        "type": "dir",
                        "name": name,
                        "path": rel_path,
                        "children": child_count,
                        "entries": children,
                    })
                } else {
                    json!({
                        "type": "dir",
                        "name": name,
                        "path": rel_path,
                        "children": child_count,
                    })
                }
            } else {
                let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                let language = rlm_core::Language::from_path(&path).map(|l| l.name());
                json!({
                    "type": "file",
                    "name": name,
                    "path": rel_path,
                    "size": size,
                    "language": language,
                })
            }
        })
        .collect()
}

/// A file's search hits.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub path: String,
    pub matches: Vec<String>,
}

/// Search `root/rel`'s subtree's skeletons for a case-insensitive substring
/// match, capped at 10 matching lines per file and 50 files overall.
pub fn search(root: &Path, rel: &Path, query: &str, cache: &SkeletonCache) -> Vec<SearchHit> {
    let mut results = Vec::new();
    let needle = query.to_lowercase();
    walk_for_search(root, &root.join(rel), &needle, cache, &mut results);
    results
}

fn walk_for_search(root: &Path, abs_dir: &Path, needle: &str, cache: &SkeletonCache, out: &mut Vec<SearchHit>) {
    if out.len() >= SEARCH_MAX_FILES {
        return;
    }
    let Ok(read_dir) = fs::read_dir(abs_dir) else {
        return;
    };

    let mut entries: Vec<_> = read_dir.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        if out.len() >= SEARCH_MAX_FILES {
            return;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if is_ignored_name(&name) {
            continue;
        }
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            walk_for_search(root, &path, needle, cache, out);
            continue;
        }

        let Some(_) = rlm_core::Language::from_path(&path) else {
            continue;
        };
        let rel_display = display_path(root, &path);
        let Ok(skeleton) = cache.get(&path, &rel_display) else {
            continue;
        };

        let matches: Vec<String> = skeleton
            .lines()
            .filter(|line| line.to_lowercase().contains(needle))
            .take(SEARCH_MAX_LINES_PER_FILE)
            .map(|line| line.trim().to_string())
            .collect();

        if !matches.is_empty() {
            out.push(SearchHit { path: rel_display, matches });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn tree_sorts_dirs_before_files_case_insensitive() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("Zeta")).unwrap();
        fs::write(dir.path().join("alpha.py"), "").unwrap();
        fs::create_dir(dir.path().join("beta")).unwrap();

        let entries = tree(dir.path(), Path::new("."), 4);
        let names: Vec<&str> = entries.iter().map(|e| e["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["beta", "Zeta", "alpha.py"]);
    }

    #[test]
    fn tree_collapses_past_max_depth() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/deep.py"), "").unwrap();

        let entries = tree(dir.path(), Path::new("."), 0);
        let a = &entries[0];
        assert_eq!(a["children"], 1);
        assert!(a.get("entries").is_none());
    }

    #[test]
    fn tree_skips_ignored_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("main.rs"), "").unwrap();

        let entries = tree(dir.path(), Path::new("."), 4);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["name"], "main.rs");
    }

    #[test]
    fn search_finds_matching_skeleton_lines() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "def target_fn():\n    pass\n").unwrap();
        fs::write(dir.path().join("b.py"), "def other():\n    pass\n").unwrap();

        let cache = SkeletonCache::new();
        let hits = search(dir.path(), Path::new("."), "target_fn", &cache);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "a.py");
    }
}
