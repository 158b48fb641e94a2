//! Per-action request handlers.
//!
//! One [`Dispatcher`] is constructed per daemon process and shared by every
//! connection worker thread. `dispatch` decodes one already-parsed JSON
//! request, confines every `path` argument under the project root (§4.H),
//! routes to the matching subsystem, and records session statistics. The
//! caller (`server.rs`) applies `rlm_store::truncate` to the serialized
//! response at the transport boundary, per §4.I.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use rlm_core::Language;
use rlm_sandbox::{Sandbox, Staleness};
use rlm_store::{ChunkListing, ChunkStore, SkeletonCache};

use crate::confinement::confine;
use crate::stats::SessionStats;

/// Owns every subsystem a request might touch, plus the session-wide
/// statistics counters. Every field here is individually thread-safe (per
/// §5's concurrency model), so `Dispatcher` itself needs no lock of its own.
pub struct Dispatcher {
    root: PathBuf,
    cache: SkeletonCache,
    chunks: ChunkStore,
    sandbox: Sandbox,
    stats: SessionStats,
}

impl Dispatcher {
    pub fn new(root: PathBuf) -> Self {
        let chunks = ChunkStore::new(&root);
        let sandbox = Sandbox::new(&root);
        Self {
            root,
            cache: SkeletonCache::new(),
            chunks,
            sandbox,
            stats: SessionStats::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache(&self) -> &SkeletonCache {
        &self.cache
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Handle one already-parsed JSON request, returning the untruncated
    /// response body.
    pub fn dispatch(&self, request: &Value) -> Value {
        self.stats.bump_tool_calls();

        let Some(action) = request.get("action").and_then(Value::as_str) else {
            return error_response("Invalid JSON");
        };

        match action {
            "status" => self.status(),
            "squeeze" => self.squeeze(request),
            "find" => self.find(request),
            "tree" => self.tree(request),
            "search" => self.search(request),
            "chunks_list" => self.chunks_list(request),
            "chunks_read" => self.chunks_read(request),
            "repl_init" => self.repl_init(),
            "repl_exec" => self.repl_exec(request),
            "repl_status" => self.repl_status(),
            "repl_reset" => self.repl_reset(),
            "repl_export_buffers" => self.repl_export_buffers(),
            other => error_response(&format!("Unknown action: {other}")),
        }
    }

    fn status(&self) -> Value {
        let languages: Vec<&'static str> = rlm_core::available_languages().iter().map(|l| l.name()).collect();
        let snap = self.stats.snapshot();
        json!({
            "status": "alive",
            "root": self.root.to_string_lossy(),
            "cache_size": self.cache.len(),
            "languages": languages,
            "session": {
                "tool_calls": snap.tool_calls,
                "bytes_served": snap.bytes_served,
                "bytes_avoided": snap.bytes_avoided,
                "by_action": snap.by_action,
            },
        })
    }

    fn squeeze(&self, request: &Value) -> Value {
        let Some(path) = string_arg(request, "path") else {
            return error_response("Invalid JSON");
        };
        let (abs, rel) = match confine(&self.root, path) {
            Ok(v) => v,
            Err(e) => return error_response(&e),
        };
        let metadata = match fs::metadata(&abs) {
            Ok(m) => m,
            Err(_) => return error_response("File not found"),
        };
        match self.cache.get(&abs, &rel) {
            Ok(skeleton) => {
                self.stats.record("squeeze", skeleton.len() as u64, metadata.len());
                json!({ "skeleton": skeleton })
            }
            Err(e) => error_response(&e.to_string()),
        }
    }

    fn find(&self, request: &Value) -> Value {
        let (Some(path), Some(symbol)) = (string_arg(request, "path"), string_arg(request, "symbol")) else {
            return error_response("Invalid JSON");
        };
        let (abs, rel) = match confine(&self.root, path) {
            Ok(v) => v,
            Err(e) => return error_response(&e),
        };
        let Ok(bytes) = fs::read(&abs) else {
            return error_response("File not found");
        };
        let Some(language) = Language::from_path(&abs) else {
            return error_response(&format!("Symbol locating not supported for {rel}"));
        };
        let Ok(text) = std::str::from_utf8(&bytes) else {
            return error_response("File is not valid UTF-8");
        };
        match rlm_core::find_symbol(text, language, symbol) {
            Ok(Some(span)) => {
                let drilled = drilled_region_bytes(text, span.start_line, span.end_line);
                let file_size = bytes.len() as u64;
                self.stats.record("find", drilled, file_size.saturating_sub(drilled));
                json!({ "start_line": span.start_line, "end_line": span.end_line })
            }
            Ok(None) => error_response(&format!("Symbol '{symbol}' not found in {rel}")),
            Err(e) => error_response(&e.to_string()),
        }
    }

    fn tree(&self, request: &Value) -> Value {
        let path = string_arg(request, "path").unwrap_or(".");
        let max_depth = request.get("max_depth").and_then(Value::as_u64).unwrap_or(4) as usize;
        let (_, rel) = match confine(&self.root, path) {
            Ok(v) => v,
            Err(e) => return error_response(&e),
        };
        let entries = rlm_tree::tree(&self.root, Path::new(&rel), max_depth);
        json!({ "tree": entries })
    }

    fn search(&self, request: &Value) -> Value {
        let Some(query) = string_arg(request, "query") else {
            return error_response("Invalid JSON");
        };
        let path = string_arg(request, "path").unwrap_or("");
        let (_, rel) = match confine(&self.root, path) {
            Ok(v) => v,
            Err(e) => return error_response(&e),
        };

        let hits = rlm_tree::search(&self.root, Path::new(&rel), query, &self.cache);
        let bytes_avoided: u64 = hits
            .iter()
            .map(|h| fs::metadata(self.root.join(&h.path)).map(|m| m.len()).unwrap_or(0))
            .sum();
        let results: Vec<Value> = hits
            .iter()
            .map(|h| json!({ "path": h.path, "matches": h.matches }))
            .collect();
        let bytes_served: u64 = results.iter().map(|r| r.to_string().len() as u64).sum();
        self.stats.record("search", bytes_served, bytes_avoided);
        json!({ "results": results })
    }

    fn chunks_list(&self, request: &Value) -> Value {
        let Some(path) = string_arg(request, "path") else {
            return error_response("Invalid JSON");
        };
        let (_, rel) = match confine(&self.root, path) {
            Ok(v) => v,
            Err(e) => return error_response(&e),
        };
        match self.chunks.list(Path::new(&rel)) {
            ChunkListing::Ready { manifest_json } => json!({ "status": "ready", "manifest": manifest_json }),
            ChunkListing::Pending => json!({ "status": "pending" }),
        }
    }

    fn chunks_read(&self, request: &Value) -> Value {
        let Some(path) = string_arg(request, "path") else {
            return error_response("Invalid JSON");
        };
        let Some(chunk) = request.get("chunk").and_then(Value::as_u64) else {
            return error_response("Invalid JSON");
        };
        let (abs, rel) = match confine(&self.root, path) {
            Ok(v) => v,
            Err(e) => return error_response(&e),
        };
        match self.chunks.read(Path::new(&rel), chunk as usize) {
            Ok(chunk_read) => {
                let file_size = fs::metadata(&abs).map(|m| m.len()).unwrap_or(0);
                let served = chunk_read.content.len() as u64;
                self.stats.record("chunks_read", served, file_size.saturating_sub(served));
                json!({
                    "content": chunk_read.content,
                    "chunk": chunk_read.chunk,
                    "total_chunks": chunk_read.total_chunks,
                    "lines": chunk_read.lines,
                })
            }
            Err(rlm_store::StoreError::Pending) => error_response("File not yet chunked"),
            Err(rlm_store::StoreError::ChunkOutOfRange(i, n)) => {
                error_response(&format!("Chunk {i} not found (file has {n} chunks)"))
            }
            Err(e) => error_response(&e.to_string()),
        }
    }

    fn repl_init(&self) -> Value {
        match self.sandbox.init() {
            Ok(()) => json!({ "status": "ok" }),
            Err(e) => error_response(&e.to_string()),
        }
    }

    fn repl_exec(&self, request: &Value) -> Value {
        let Some(code) = string_arg(request, "code") else {
            return error_response("Invalid JSON");
        };
        match self.sandbox.exec(code) {
            Ok(result) => json!({
                "output": result.output,
                "success": !result.is_error,
                "variables": result.variables,
                "exec_count": result.exec_count,
                "staleness": staleness_json(&result.staleness),
            }),
            Err(e) => error_response(&e.to_string()),
        }
    }

    fn repl_status(&self) -> Value {
        let result = self.sandbox.status();
        json!({
            "variables": result.variables,
            "buffer_counts": result.buffer_counts,
            "exec_count": result.exec_count,
            "staleness": staleness_json(&result.staleness),
        })
    }

    fn repl_reset(&self) -> Value {
        match self.sandbox.reset() {
            Ok(()) => json!({ "status": "ok" }),
            Err(e) => error_response(&e.to_string()),
        }
    }

    fn repl_export_buffers(&self) -> Value {
        json!({ "buffers": self.sandbox.export_buffers() })
    }
}

fn string_arg<'a>(request: &'a Value, key: &str) -> Option<&'a str> {
    request.get(key).and_then(Value::as_str)
}

fn error_response(message: &str) -> Value {
    json!({ "error": message })
}

fn staleness_json(staleness: &Option<Staleness>) -> Value {
    match staleness {
        Some(s) => serde_json::to_value(s).unwrap_or(Value::Null),
        None => Value::Null,
    }
}

/// Bytes covered by the inclusive line span `[start_line, end_line]`,
/// counting the trailing newline of every line but the last (matching what
/// a client's own slicing of the file would have taken).
fn drilled_region_bytes(text: &str, start_line: usize, end_line: usize) -> u64 {
    let lines: Vec<&str> = text.split('\n').collect();
    if start_line == 0 || start_line > lines.len() {
        return 0;
    }
    let end = end_line.min(lines.len());
    lines[(start_line - 1)..end]
        .iter()
        .map(|l| l.len() as u64 + 1)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn dispatcher(root: &Path) -> Dispatcher {
        Dispatcher::new(root.to_path_buf())
    }

    #[test]
    fn status_reports_alive_and_languages() {
        let dir = tempdir().unwrap();
        let d = dispatcher(dir.path());
        let resp = d.dispatch(&json!({ "action": "status" }));
        assert_eq!(resp["status"], "alive");
        assert!(resp["languages"].as_array().unwrap().contains(&json!("python")));
        assert_eq!(resp["session"]["tool_calls"], 1);
    }

    #[test]
    fn squeeze_returns_skeleton_for_known_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("main.py"), "class A:\n    def m(self):\n        pass\n").unwrap();
        let d = dispatcher(dir.path());
        let resp = d.dispatch(&json!({ "action": "squeeze", "path": "main.py" }));
        assert!(resp["skeleton"].as_str().unwrap().contains("class A:"));
    }

    #[test]
    fn squeeze_rejects_path_escaping_root() {
        let dir = tempdir().unwrap();
        let d = dispatcher(dir.path());
        let resp = d.dispatch(&json!({ "action": "squeeze", "path": "../../etc/passwd" }));
        assert_eq!(resp["error"], "Path outside project root");
    }

    #[test]
    fn find_locates_symbol() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("main.py"), "class A:\n    def m(self):\n        pass\n").unwrap();
        let d = dispatcher(dir.path());
        let resp = d.dispatch(&json!({ "action": "find", "path": "main.py", "symbol": "m" }));
        assert_eq!(resp["start_line"], 2);
        assert_eq!(resp["end_line"], 3);
    }

    #[test]
    fn find_reports_missing_symbol_by_name() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("main.py"), "class A:\n    def m(self):\n        pass\n").unwrap();
        let d = dispatcher(dir.path());
        let resp = d.dispatch(&json!({ "action": "find", "path": "main.py", "symbol": "Z" }));
        assert_eq!(resp["error"], "Symbol 'Z' not found in main.py");
    }

    #[test]
    fn unknown_action_reports_its_name() {
        let dir = tempdir().unwrap();
        let d = dispatcher(dir.path());
        let resp = d.dispatch(&json!({ "action": "bogus" }));
        assert_eq!(resp["error"], "Unknown action: bogus");
    }

    #[test]
    fn chunks_list_reports_pending_before_full_scan() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let d = dispatcher(dir.path());
        let resp = d.dispatch(&json!({ "action": "chunks_list", "path": "a.py" }));
        assert_eq!(resp["status"], "pending");
    }

    #[test]
    fn chunks_read_returns_header_and_body() {
        let dir = tempdir().unwrap();
        let abs = dir.path().join("a.py");
        let body = (0..300).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        fs::write(&abs, &body).unwrap();
        let d = dispatcher(dir.path());
        d.chunks.update(Path::new("a.py"), &abs).unwrap();

        let resp = d.dispatch(&json!({ "action": "chunks_read", "path": "a.py", "chunk": 0 }));
        assert_eq!(resp["lines"], "1-200");
        assert!(resp["content"].as_str().unwrap().starts_with("# a.py lines 1-200"));
    }

    #[test]
    fn repl_roundtrip_binds_and_reports_status() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "one\ntwo\n").unwrap();
        let d = dispatcher(dir.path());
        let exec_resp = d.dispatch(&json!({ "action": "repl_exec", "code": "text = peek(\"a.py\")" }));
        assert_eq!(exec_resp["success"], true);

        let status_resp = d.dispatch(&json!({ "action": "repl_status" }));
        assert!(status_resp["variables"].as_array().unwrap().iter().any(|v| v == "text"));
    }

    #[test]
    fn session_stats_accumulate_bytes_avoided_for_squeeze() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let d = dispatcher(dir.path());
        d.dispatch(&json!({ "action": "squeeze", "path": "a.py" }));
        let snap = d.stats.snapshot();
        assert!(snap.by_action.get("squeeze").unwrap().bytes_avoided > 0);
    }
}
