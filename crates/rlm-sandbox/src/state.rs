//! Persisted namespace snapshot.
//!
//! Per the Design Note "Pickled sandbox → portable snapshot", the original
//! `pickle`-backed state file becomes a `serde_json`-serialized `Namespace`:
//! JSON-unsafe values are simply never producible by the fixed helper menu,
//! so there is nothing to drop silently. Written with the same
//! temp-file-then-rename idiom the chunk store uses for crash safety.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SandboxError;

/// `{relpath -> mtime_secs}` dependency record for one variable or buffer.
pub type DepRecord = BTreeMap<String, u64>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dependencies {
    pub variables: BTreeMap<String, DepRecord>,
    pub buffers: BTreeMap<String, DepRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Namespace {
    pub variables: BTreeMap<String, Value>,
    pub buffers: BTreeMap<String, Vec<String>>,
    pub deps: Dependencies,
    pub exec_count: u64,
    pub last_exec: Option<String>,
}

impl Namespace {
    pub fn user_visible_names(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }
}

pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(project_root: &Path) -> Self {
        Self {
            path: project_root.join(".claude").join("rlm_state").join("state.json"),
        }
    }

    pub fn load(&self) -> Namespace {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Namespace::default(),
        }
    }

    pub fn save(&self, namespace: &Namespace) -> Result<(), SandboxError> {
        let dir = self.path.parent().ok_or(SandboxError::InvalidStatePath)?;
        fs::create_dir_all(dir)?;
        let tmp_path = dir.join(format!(".state.json.tmp-{}", std::process::id()));
        fs::write(&tmp_path, serde_json::to_vec_pretty(namespace)?)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    pub fn delete(&self) -> Result<(), SandboxError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_state_loads_as_default() {
        let dir = tempdir().unwrap();
        let state = StateFile::new(dir.path());
        let ns = state.load();
        assert_eq!(ns.exec_count, 0);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let state = StateFile::new(dir.path());
        let mut ns = Namespace::default();
        ns.variables.insert("x".to_string(), Value::from(42));
        ns.exec_count = 3;
        state.save(&ns).unwrap();

        let loaded = state.load();
        assert_eq!(loaded.exec_count, 3);
        assert_eq!(loaded.variables.get("x"), Some(&Value::from(42)));
    }
}
