//! Persistent scripting sandbox: the fixed helper-call grammar, dependency
//! tracking, and staleness detection described in spec §4.G.
//!
//! ARCHITECTURE: there is no embedded interpreter. `exec` runs a
//! newline-separated sequence of calls against a closed helper menu
//! (`peek`, `grep`, `chunk_indices`, `write_chunks`, `add_buffer`), parsed by
//! `expr`. The namespace persists as JSON (`state::Namespace`) instead of
//! the original `pickle` blob, since every value this grammar can produce is
//! already JSON-safe.

mod expr;
mod helpers;
mod state;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

use expr::{parse_statement, Arg, Statement};
use helpers::DependencyTracker;
pub use state::{DepRecord, Namespace};
use state::StateFile;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] rlm_store::StoreError),
    #[error(transparent)]
    Parse(#[from] expr::ParseError),
    #[error("path outside project root: {0}")]
    PathOutsideRoot(String),
    #[error("invalid regex pattern: {0}")]
    InvalidPattern(String),
    #[error("unknown helper: {0}")]
    UnknownHelper(String),
    #[error("{helper} expected {expected} argument(s), got {got}")]
    ArityMismatch {
        helper: String,
        expected: &'static str,
        got: usize,
    },
    #[error("argument must be a string or a previously bound string variable")]
    ExpectedString,
    #[error("argument must be an integer or a previously bound integer variable")]
    ExpectedInt,
    #[error("unbound variable: {0}")]
    UnboundVariable(String),
    #[error("invalid state file path")]
    InvalidStatePath,
}

/// One `repl_exec` response.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub output: String,
    pub is_error: bool,
    pub variables: Vec<String>,
    pub exec_count: u64,
    pub staleness: Option<Staleness>,
}

/// `repl_status` response.
#[derive(Debug, Clone)]
pub struct StatusResult {
    pub variables: Vec<String>,
    pub buffer_counts: BTreeMap<String, usize>,
    pub exec_count: u64,
    pub staleness: Option<Staleness>,
}

/// One dependency of a stale variable or buffer: a file that moved under it
/// since the value was computed.
#[derive(Debug, Clone, Serialize)]
pub struct StalenessEntry {
    pub file: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Staleness {
    pub variables: BTreeMap<String, Vec<StalenessEntry>>,
    pub buffers: BTreeMap<String, Vec<StalenessEntry>>,
}

impl Staleness {
    fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.buffers.is_empty()
    }
}

const CHUNK_SIZE_DEFAULT: usize = rlm_store::CHUNK_SIZE;
const CHUNK_OVERLAP_DEFAULT: usize = rlm_store::OVERLAP;
const GREP_MAX_DEFAULT: usize = 50;

/// The sandbox: one persisted [`Namespace`] per project root, guarded by a
/// single mutex that serializes `init`/`exec`/`status`/`reset`/
/// `export_buffers` and all dependency updates, per §5's concurrency model.
pub struct Sandbox {
    root: PathBuf,
    state_file: StateFile,
    namespace: Mutex<Namespace>,
}

impl Sandbox {
    pub fn new(root: &Path) -> Self {
        let state_file = StateFile::new(root);
        let namespace = state_file.load();
        Self {
            root: root.to_path_buf(),
            state_file,
            namespace: Mutex::new(namespace),
        }
    }

    pub fn init(&self) -> Result<(), SandboxError> {
        let mut ns = self.lock();
        *ns = Namespace::default();
        self.state_file.save(&ns)
    }

    pub fn reset(&self) -> Result<(), SandboxError> {
        self.state_file.delete()?;
        let mut ns = self.lock();
        *ns = Namespace::default();
        Ok(())
    }

    pub fn export_buffers(&self) -> BTreeMap<String, Vec<String>> {
        self.lock().buffers.clone()
    }

    pub fn status(&self) -> StatusResult {
        let ns = self.lock();
        let staleness = check_staleness(&ns, &self.root);
        StatusResult {
            variables: ns.user_visible_names(),
            buffer_counts: ns.buffers.iter().map(|(k, v)| (k.clone(), v.len())).collect(),
            exec_count: ns.exec_count,
            staleness,
        }
    }

    /// `invalidate_dependencies(path)`: report (without mutating) every name
    /// whose dependency record mentions `path`. Called by the watcher on
    /// modify/delete.
    pub fn invalidate_dependencies(&self, abs_path: &Path) -> Vec<String> {
        let rel = abs_path
            .strip_prefix(&self.root)
            .unwrap_or(abs_path)
            .to_string_lossy()
            .replace('\\', "/");
        let ns = self.lock();
        let mut out = Vec::new();
        for (name, record) in &ns.deps.variables {
            if record.contains_key(&rel) {
                out.push(format!("var:{name}"));
            }
        }
        for (name, record) in &ns.deps.buffers {
            if record.contains_key(&rel) {
                out.push(format!("buffer:{name}"));
            }
        }
        out
    }

    pub fn exec(&self, code: &str) -> Result<ExecResult, SandboxError> {
        let mut ns = self.lock();
        let mut tracker = DependencyTracker::new();
        let mut stdout = String::new();
        let mut bound_names: Vec<String> = Vec::new();
        let mut buffer_touches: Vec<String> = Vec::new();
        let mut failure: Option<String> = None;

        for line in code.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let outcome = parse_statement(line)
                .map_err(SandboxError::from)
                .and_then(|stmt| dispatch(&self.root, &mut tracker, &ns, &stmt).map(|v| (stmt, v)));

            match outcome {
                Ok((stmt, value)) => {
                    if stmt.helper == "add_buffer" {
                        if let Some(key) = first_arg_as_key(&stmt, &ns) {
                            let text = resolve_str(&stmt.args[1], &ns).unwrap_or_default();
                            ns.buffers.entry(key.clone()).or_default().push(text);
                            buffer_touches.push(key);
                        }
                    }
                    if let Some(name) = &stmt.binding {
                        ns.variables.insert(name.clone(), value);
                        bound_names.push(name.clone());
                    } else {
                        stdout.push_str(&value.to_string());
                        stdout.push('\n');
                    }
                }
                Err(err) => {
                    failure = Some(format!("{err}\n  at: {line}"));
                    break;
                }
            }
        }

        let touched = tracker.into_map();
        for name in &bound_names {
            merge_dep_record(ns.deps.variables.entry(name.clone()).or_default(), &touched);
        }
        for key in &buffer_touches {
            merge_dep_record(ns.deps.buffers.entry(key.clone()).or_default(), &touched);
        }

        ns.exec_count += 1;
        ns.last_exec = Some(now_secs().to_string());

        let is_error = failure.is_some();
        let raw_output = failure.unwrap_or(stdout);
        let output = rlm_store::truncate(&raw_output, rlm_store::RESPONSE_CAP);

        self.state_file.save(&ns)?;
        let staleness = check_staleness(&ns, &self.root);

        Ok(ExecResult {
            output,
            is_error,
            variables: ns.user_visible_names(),
            exec_count: ns.exec_count,
            staleness,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Namespace> {
        self.namespace.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn first_arg_as_key(stmt: &Statement, ns: &Namespace) -> Option<String> {
    stmt.args.first().and_then(|a| resolve_str(a, ns).ok())
}

fn merge_dep_record(record: &mut DepRecord, touched: &BTreeMap<String, u64>) {
    for (path, mtime) in touched {
        record
            .entry(path.clone())
            .and_modify(|existing| *existing = (*existing).max(*mtime))
            .or_insert(*mtime);
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn resolve_str(arg: &Arg, ns: &Namespace) -> Result<String, SandboxError> {
    match arg {
        Arg::Str(s) => Ok(s.clone()),
        Arg::Int(n) => Ok(n.to_string()),
        Arg::Ref(name) => match ns.variables.get(name) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(SandboxError::UnboundVariable(name.clone())),
        },
    }
}

fn resolve_usize(arg: &Arg, ns: &Namespace) -> Result<usize, SandboxError> {
    match arg {
        Arg::Int(n) if *n >= 0 => Ok(*n as usize),
        Arg::Int(_) => Err(SandboxError::ExpectedInt),
        Arg::Str(_) => Err(SandboxError::ExpectedInt),
        Arg::Ref(name) => match ns.variables.get(name) {
            Some(Value::Number(n)) => n.as_u64().map(|v| v as usize).ok_or(SandboxError::ExpectedInt),
            _ => Err(SandboxError::UnboundVariable(name.clone())),
        },
    }
}

fn is_none_literal(arg: &Arg) -> bool {
    matches!(arg, Arg::Ref(name) if name == "None")
}

fn dispatch(root: &Path, tracker: &mut DependencyTracker, ns: &Namespace, stmt: &Statement) -> Result<Value, SandboxError> {
    match stmt.helper.as_str() {
        "peek" => {
            let path = resolve_str(
                stmt.args.first().ok_or(SandboxError::ArityMismatch { helper: "peek".into(), expected: "1-3", got: stmt.args.len() })?,
                ns,
            )?;
            let start = match stmt.args.get(1) {
                Some(a) if !is_none_literal(a) => resolve_usize(a, ns)?,
                _ => 1,
            };
            let end = match stmt.args.get(2) {
                Some(a) if !is_none_literal(a) => Some(resolve_usize(a, ns)?),
                _ => None,
            };
            let text = helpers::peek(root, tracker, &path, start, end)?;
            Ok(Value::String(text))
        }
        "grep" => {
            let pattern = resolve_str(
                stmt.args.first().ok_or(SandboxError::ArityMismatch { helper: "grep".into(), expected: "1-3", got: stmt.args.len() })?,
                ns,
            )?;
            let path = match stmt.args.get(1) {
                Some(a) => resolve_str(a, ns)?,
                None => ".".to_string(),
            };
            let max_results = match stmt.args.get(2) {
                Some(a) => resolve_usize(a, ns)?,
                None => GREP_MAX_DEFAULT,
            };
            let hits = helpers::grep(root, tracker, &pattern, &path, max_results)?;
            Ok(Value::Array(hits.into_iter().map(Value::String).collect()))
        }
        "chunk_indices" => {
            let path = resolve_str(
                stmt.args.first().ok_or(SandboxError::ArityMismatch { helper: "chunk_indices".into(), expected: "1-3", got: stmt.args.len() })?,
                ns,
            )?;
            let size = match stmt.args.get(1) {
                Some(a) => resolve_usize(a, ns)?,
                None => CHUNK_SIZE_DEFAULT,
            };
            let overlap = match stmt.args.get(2) {
                Some(a) => resolve_usize(a, ns)?,
                None => CHUNK_OVERLAP_DEFAULT,
            };
            let boundaries = helpers::chunk_indices(root, tracker, &path, size, overlap)?;
            Ok(Value::Array(
                boundaries
                    .into_iter()
                    .map(|(s, e)| Value::Array(vec![Value::from(s), Value::from(e)]))
                    .collect(),
            ))
        }
        "write_chunks" => {
            let path = resolve_str(
                stmt.args.first().ok_or(SandboxError::ArityMismatch { helper: "write_chunks".into(), expected: "1-4", got: stmt.args.len() })?,
                ns,
            )?;
            let out_dir = match stmt.args.get(1) {
                Some(a) if !is_none_literal(a) => Some(PathBuf::from(resolve_str(a, ns)?)),
                _ => None,
            };
            let size = match stmt.args.get(2) {
                Some(a) => resolve_usize(a, ns)?,
                None => CHUNK_SIZE_DEFAULT,
            };
            let overlap = match stmt.args.get(3) {
                Some(a) => resolve_usize(a, ns)?,
                None => CHUNK_OVERLAP_DEFAULT,
            };
            let written = helpers::write_chunks(root, tracker, &path, out_dir.as_deref(), size, overlap)?;
            Ok(Value::Array(written.into_iter().map(Value::String).collect()))
        }
        "add_buffer" => {
            if stmt.args.len() != 2 {
                return Err(SandboxError::ArityMismatch { helper: "add_buffer".into(), expected: "2", got: stmt.args.len() });
            }
            // Value computed here is just the echoed buffer key; the actual
            // append happens in `exec`, which also owns `ns.buffers` mutably.
            let key = resolve_str(&stmt.args[0], ns)?;
            Ok(Value::String(key))
        }
        other => Err(SandboxError::UnknownHelper(other.to_string())),
    }
}

fn check_staleness(ns: &Namespace, root: &Path) -> Option<Staleness> {
    let mut out = Staleness::default();
    for (name, record) in &ns.deps.variables {
        let msgs = staleness_messages(record, root);
        if !msgs.is_empty() {
            out.variables.insert(name.clone(), msgs);
        }
    }
    for (name, record) in &ns.deps.buffers {
        let msgs = staleness_messages(record, root);
        if !msgs.is_empty() {
            out.buffers.insert(name.clone(), msgs);
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn staleness_messages(record: &DepRecord, root: &Path) -> Vec<StalenessEntry> {
    let mut msgs = Vec::new();
    for (rel, recorded_mtime) in record {
        let abs = root.join(rel);
        match fs::metadata(&abs).and_then(|m| m.modified()) {
            Ok(modified) => {
                let secs = modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
                if secs != *recorded_mtime {
                    msgs.push(StalenessEntry { file: rel.clone(), reason: "modified".to_string() });
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                msgs.push(StalenessEntry { file: rel.clone(), reason: "deleted".to_string() })
            }
            Err(_) => msgs.push(StalenessEntry { file: rel.clone(), reason: "inaccessible".to_string() }),
        }
    }
    msgs
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn peek_binds_and_reports_no_staleness() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "one\ntwo\nthree\n").unwrap();
        let sandbox = Sandbox::new(dir.path());

        let result = sandbox.exec(r#"text = peek("a.py", 1, 2)"#).unwrap();
        assert!(!result.is_error);
        assert!(result.variables.contains(&"text".to_string()));
        assert!(result.staleness.is_none());
    }

    #[test]
    fn modifying_a_dependency_triggers_staleness() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        fs::write(&file, "one\ntwo\n").unwrap();
        let sandbox = Sandbox::new(dir.path());
        sandbox.exec(r#"text = peek("a.py")"#).unwrap();

        std::thread::sleep(std::time::Duration::from_secs(1));
        fs::write(&file, "one\ntwo\nthree\n").unwrap();

        let status = sandbox.status();
        let staleness = status.staleness.unwrap();
        assert!(staleness.variables.contains_key("text"));
    }

    #[test]
    fn add_buffer_appends_and_tracks_dependency() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "hello\n").unwrap();
        let sandbox = Sandbox::new(dir.path());

        sandbox.exec(r#"text = peek("a.py")"#).unwrap();
        sandbox.exec(r#"add_buffer("notes", text)"#).unwrap();

        let buffers = sandbox.export_buffers();
        assert_eq!(buffers.get("notes").unwrap().len(), 1);
    }

    #[test]
    fn reset_clears_namespace() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "hi\n").unwrap();
        let sandbox = Sandbox::new(dir.path());
        sandbox.exec(r#"text = peek("a.py")"#).unwrap();
        sandbox.reset().unwrap();
        assert!(sandbox.status().variables.is_empty());
    }

    #[test]
    fn unknown_helper_reports_error_without_panicking() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path());
        let result = sandbox.exec("x = nonexistent(\"a\")").unwrap();
        assert!(result.is_error);
    }

    #[test]
    fn invalidate_dependencies_reports_affected_names() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        fs::write(&file, "hi\n").unwrap();
        let sandbox = Sandbox::new(dir.path());
        sandbox.exec(r#"text = peek("a.py")"#).unwrap();

        let affected = sandbox.invalidate_dependencies(&file);
        assert_eq!(affected, vec!["var:text".to_string()]);
    }
}
