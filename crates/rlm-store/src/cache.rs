//! In-memory skeleton cache.
//!
//! Ported from `rlm_daemon.py`'s `SkeletonCache`: a mtime-keyed map guarded
//! by a single mutex, with the expensive parse running outside the lock so a
//! slow file never blocks unrelated readers. Double-compute under
//! contention is accepted; a torn `(skeleton, mtime)` pair is not, so both
//! fields are always written together under the lock.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use rlm_core::{squeeze_path, Language};

use crate::StoreError;

#[derive(Clone)]
struct Entry {
    skeleton: String,
    mtime: SystemTime,
}

/// Process-wide cache of `path -> (skeleton, mtime)`.
pub struct SkeletonCache {
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

impl Default for SkeletonCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SkeletonCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the skeleton for `abs_path`, computing it if absent or stale.
    ///
    /// `display_name` is the name embedded in the skeleton's header line
    /// (normally `abs_path` relative to the project root).
    pub fn get(&self, abs_path: &Path, display_name: &str) -> Result<String, StoreError> {
        let metadata = fs::metadata(abs_path)?;
        let mtime = metadata.modified()?;

        {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = entries.get(abs_path) {
                if entry.mtime == mtime {
                    return Ok(entry.skeleton.clone());
                }
            }
        }

        let bytes = fs::read(abs_path)?;
        let skeleton = squeeze_path(display_name, abs_path, &bytes)?;

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            abs_path.to_path_buf(),
            Entry {
                skeleton: skeleton.clone(),
                mtime,
            },
        );
        Ok(skeleton)
    }

    /// Drop a path's entry. Called by the watcher on modify/delete.
    pub fn invalidate(&self, abs_path: &Path) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(abs_path);
    }

    /// Number of entries currently cached, for the `status` action.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// True if `path`'s extension maps to a registered grammar.
pub fn is_supported(path: &Path) -> bool {
    Language::from_path(path).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn caches_until_mtime_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.py");
        {
            let mut f = fs::File::create(&path).unwrap();
            writeln!(f, "def f():\n    pass").unwrap();
        }
        let cache = SkeletonCache::new();
        let first = cache.get(&path, "a.py").unwrap();
        assert!(first.contains("def f():"));
        assert_eq!(cache.len(), 1);

        let second = cache.get(&path, "a.py").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn invalidate_clears_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.py");
        fs::write(&path, "def f():\n    pass\n").unwrap();
        let cache = SkeletonCache::new();
        cache.get(&path, "a.py").unwrap();
        cache.invalidate(&path);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn missing_file_errors() {
        let cache = SkeletonCache::new();
        let missing = PathBuf::from("/definitely/does/not/exist.py");
        assert!(cache.get(&missing, "x.py").is_err());
    }
}
