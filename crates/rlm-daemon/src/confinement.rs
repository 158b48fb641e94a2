//! Path confinement: every `path` argument in a request must resolve under
//! the project root after symlink resolution.

use std::fs;
use std::path::{Component, Path, PathBuf};

/// Resolve `rel` against `root`, returning the absolute path and its
/// root-relative display form. Rejects anything that escapes `root`,
/// including via `..` components or a symlink pointing outside it.
pub fn confine(root: &Path, rel: &str) -> Result<(PathBuf, String), String> {
    let candidate = Path::new(rel);
    if candidate.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err("Path outside project root".to_string());
    }

    let joined = root.join(candidate);
    let canonical_root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    // canonicalize requires the path to exist; fall back to the
    // lexically-joined path for not-yet-existing targets (e.g. a file a
    // watcher is about to create), but still check it against the root.
    let canonical = fs::canonicalize(&joined).unwrap_or_else(|_| joined.clone());

    if !canonical.starts_with(&canonical_root) {
        return Err("Path outside project root".to_string());
    }

    let display = canonical
        .strip_prefix(&canonical_root)
        .unwrap_or(candidate)
        .to_string_lossy()
        .replace('\\', "/");
    Ok((joined, display))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn accepts_paths_inside_root() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "").unwrap();
        assert!(confine(dir.path(), "a.py").is_ok());
    }

    #[test]
    fn rejects_parent_dir_escape() {
        let dir = tempdir().unwrap();
        assert!(confine(dir.path(), "../../etc/passwd").is_err());
    }

    #[test]
    fn rejects_symlink_escape() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), "shh").unwrap();

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.txt")).unwrap();
            assert!(confine(dir.path(), "link.txt").is_err());
        }
    }
}
