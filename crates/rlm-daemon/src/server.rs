//! TCP listener: port probing, the per-connection worker pool, incremental
//! JSON framing, and the idle-shutdown watchdog described in spec.md §4.H
//! and §5.
//!
//! Ported from `rlm_daemon.py`'s `run_server`/`handle_client`: the same
//! `port..port+20` bind scan, the same "read until the buffer parses as one
//! JSON value" framing, and the same bare-connection-is-a-health-probe rule.
//! Session stats, the `.rlm/port` file, and the idle watchdog are additions
//! spec.md §4.H and §8 ask for that the original daemon does not have.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

use rlm_watch::{ChangeKind, FileWatcher};

use crate::dispatch::Dispatcher;
use crate::DaemonError;

const PORT_PROBE_RANGE: u16 = 20;
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(1);
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);
const READ_CHUNK: usize = 4096;

/// A bound TCP listener plus the process-lifetime state (project root, idle
/// watchdog, `.rlm/port` lifecycle) wrapped around it.
pub struct Server {
    listener: TcpListener,
    port: u16,
    root: PathBuf,
    port_file: Option<PathBuf>,
}

impl Server {
    /// Bind on 127.0.0.1, probing the requested port and the next 19 for
    /// the first free one. Writes `.rlm/port` as `{port, pid}` when `.rlm/`
    /// already exists under `root` (install mode), per spec.md §4.H/§6.
    pub fn bind(root: &Path, requested_port: u16) -> Result<Self, DaemonError> {
        let mut bound = None;
        for offset in 0..PORT_PROBE_RANGE {
            let candidate = requested_port.saturating_add(offset);
            match TcpListener::bind(("127.0.0.1", candidate)) {
                Ok(listener) => {
                    bound = Some((listener, candidate));
                    break;
                }
                Err(err) if err.kind() == ErrorKind::AddrInUse => continue,
                Err(err) => return Err(DaemonError::Io(err)),
            }
        }
        let (listener, port) = bound.ok_or(DaemonError::NoFreePort {
            start: requested_port,
            end: requested_port.saturating_add(PORT_PROBE_RANGE),
        })?;
        listener.set_nonblocking(true)?;

        let rlm_dir = root.join(".rlm");
        let port_file = if rlm_dir.is_dir() {
            let path = rlm_dir.join("port");
            std::fs::write(&path, json!({ "port": port, "pid": std::process::id() }).to_string())?;
            Some(path)
        } else {
            None
        };

        tracing::info!(port, root = %root.display(), "daemon listening");
        Ok(Self {
            listener,
            port,
            root: root.to_path_buf(),
            port_file,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept connections until `shutdown` is set, spawning one worker
    /// thread per connection and feeding watcher events to `dispatcher` on
    /// a second thread. Blocks the calling thread; returns once shutdown
    /// has been observed and every spawned worker has, at best effort,
    /// already been handed its connection (workers are daemon-style and are
    /// not joined — matching the teacher's `daemon=True` threads).
    pub fn run(self, dispatcher: Arc<Dispatcher>, idle_timeout: Duration) {
        let shutdown = Arc::new(AtomicBool::new(false));
        let last_accept = Arc::new(AtomicU64::new(now_secs()));

        let watchdog = {
            let shutdown = Arc::clone(&shutdown);
            let last_accept = Arc::clone(&last_accept);
            thread::spawn(move || watchdog_loop(shutdown, last_accept, idle_timeout))
        };

        let watch_thread = spawn_watch_loop(Arc::clone(&dispatcher), self.root.clone(), Arc::clone(&shutdown));

        accept_loop(&self.listener, Arc::clone(&dispatcher), &shutdown, &last_accept);

        if let Some(path) = &self.port_file {
            let _ = std::fs::remove_file(path);
        }
        // Both threads poll `shutdown` on their own short intervals and exit
        // on their own; joining them here would block on a watcher whose
        // underlying `notify` channel may never wake up again once the
        // watched root's last event has already been drained.
        drop(watchdog);
        drop(watch_thread);
        tracing::info!("daemon shut down");
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn accept_loop(
    listener: &TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: &AtomicBool,
    last_accept: &Arc<AtomicU64>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                last_accept.store(now_secs(), Ordering::Relaxed);
                let dispatcher = Arc::clone(&dispatcher);
                thread::spawn(move || handle_connection(stream, &dispatcher));
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_TIMEOUT);
            }
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                thread::sleep(ACCEPT_TIMEOUT);
            }
        }
    }
}

/// Handle one connection: read until the accumulated bytes parse as a
/// single JSON value (or the peer goes quiet), dispatch, truncate, respond.
fn handle_connection(mut stream: TcpStream, dispatcher: &Dispatcher) {
    let _ = stream.set_read_timeout(Some(READ_TIMEOUT));

    let mut buffer = Vec::new();
    let mut parsed: Option<Value> = None;
    let mut timed_out_with_partial = false;

    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                match serde_json::from_slice::<Value>(&buffer) {
                    Ok(value) => {
                        parsed = Some(value);
                        break;
                    }
                    Err(_) => continue,
                }
            }
            Err(err) if is_timeout(&err) => {
                timed_out_with_partial = !buffer.is_empty();
                break;
            }
            Err(_) => break,
        }
    }

    if buffer.is_empty() {
        // Bare connection (or one that only ever timed out with nothing
        // sent): a health probe per spec.md §4.H/§6.
        let _ = stream.write_all(b"ALIVE");
        return;
    }

    if timed_out_with_partial {
        // Partial request followed by silence: close without a response,
        // per §5's "Per-connection read timeout ... otherwise closes the
        // connection."
        return;
    }

    let response_value = match parsed {
        Some(request) => dispatcher.dispatch(&request),
        None => json!({ "error": "Invalid JSON" }),
    };

    let body = response_value.to_string();
    let truncated = rlm_store::truncate(&body, rlm_store::RESPONSE_CAP);
    let _ = stream.write_all(truncated.as_bytes());
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn watchdog_loop(shutdown: Arc<AtomicBool>, last_accept: Arc<AtomicU64>, idle_timeout: Duration) {
    if idle_timeout.is_zero() {
        return;
    }
    loop {
        thread::sleep(WATCHDOG_INTERVAL);
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let idle_for = now_secs().saturating_sub(last_accept.load(Ordering::Relaxed));
        if idle_for >= idle_timeout.as_secs() {
            tracing::info!(idle_for, "idle timeout reached, shutting down");
            shutdown.store(true, Ordering::Relaxed);
            return;
        }
    }
}

/// Drain the filesystem watcher on its own thread, translating each change
/// into invalidations against the cache, chunk store, and sandbox per
/// spec.md §4.E. Exits quietly if the watcher can't be constructed (e.g. the
/// root vanished) or once `shutdown` is observed.
fn spawn_watch_loop(dispatcher: Arc<Dispatcher>, root: PathBuf, shutdown: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let watcher = match FileWatcher::new(&root) {
            Ok(w) => w,
            Err(err) => {
                tracing::warn!(error = %err, "filesystem watcher disabled");
                return;
            }
        };
        while !shutdown.load(Ordering::Relaxed) {
            match watcher.wait_timeout(ACCEPT_TIMEOUT) {
                Ok(changes) => {
                    for change in changes {
                        apply_change(&dispatcher, &change.path, &change.kind);
                    }
                }
                Err(_) => return,
            }
        }
    })
}

fn apply_change(dispatcher: &Dispatcher, abs_path: &Path, kind: &ChangeKind) {
    let rel = abs_path
        .strip_prefix(dispatcher.root())
        .unwrap_or(abs_path)
        .to_path_buf();

    match kind {
        ChangeKind::Modified => {
            dispatcher.cache().invalidate(abs_path);
            dispatcher.sandbox().invalidate_dependencies(abs_path);
            if let Err(err) = dispatcher.chunks().update(&rel, abs_path) {
                tracing::debug!(path = %rel.display(), error = %err, "re-chunk on modify failed");
            }
        }
        ChangeKind::Created => {
            if let Err(err) = dispatcher.chunks().update(&rel, abs_path) {
                tracing::debug!(path = %rel.display(), error = %err, "chunk on create failed");
            }
        }
        ChangeKind::Deleted => {
            dispatcher.cache().invalidate(abs_path);
            dispatcher.sandbox().invalidate_dependencies(abs_path);
            if let Err(err) = dispatcher.chunks().remove(&rel) {
                tracing::debug!(path = %rel.display(), error = %err, "chunk removal on delete failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use std::net::TcpStream;
    use tempfile::tempdir;

    #[test]
    fn binds_to_first_free_port() {
        let dir = tempdir().unwrap();
        let server = Server::bind(dir.path(), 19177).unwrap();
        assert!(server.port() >= 19177);
    }

    #[test]
    fn probes_next_port_when_first_is_taken() {
        let dir = tempdir().unwrap();
        let held = TcpListener::bind(("127.0.0.1", 19277)).unwrap();
        let server = Server::bind(dir.path(), 19277).unwrap();
        assert_ne!(server.port(), 19277);
        drop(held);
    }

    #[test]
    fn writes_port_file_only_when_rlm_dir_exists() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".rlm")).unwrap();
        let server = Server::bind(dir.path(), 19377).unwrap();
        let contents = std::fs::read_to_string(dir.path().join(".rlm/port")).unwrap();
        assert!(contents.contains(&server.port().to_string()));
    }

    #[test]
    fn bare_connection_receives_alive() {
        let dir = tempdir().unwrap();
        let server = Server::bind(dir.path(), 19477).unwrap();
        let port = server.port();
        let dispatcher = Arc::new(Dispatcher::new(dir.path().to_path_buf()));
        let handle = thread::spawn(move || server.run(dispatcher, Duration::from_secs(0)));

        thread::sleep(Duration::from_millis(200));
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.shutdown(std::net::Shutdown::Write).unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"ALIVE");

        // The test harness does not exercise shutdown; the spawned thread is
        // intentionally leaked for the duration of the test process, matching
        // how the accept loop is meant to run for the life of the daemon.
        drop(handle);
    }

    #[test]
    fn status_request_round_trips_over_the_socket() {
        let dir = tempdir().unwrap();
        let server = Server::bind(dir.path(), 19577).unwrap();
        let port = server.port();
        let dispatcher = Arc::new(Dispatcher::new(dir.path().to_path_buf()));
        thread::spawn(move || server.run(dispatcher, Duration::from_secs(0)));
        thread::sleep(Duration::from_millis(200));

        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.write_all(br#"{"action":"status"}"#).unwrap();
        stream.shutdown(std::net::Shutdown::Write).unwrap();

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        let response: Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(response["status"], "alive");
    }
}
