//! Recursive filesystem watcher with a fixed ignore-set.
//!
//! Shaped after `FileWatcher` in the ccmemory indexer (channel-based event
//! delivery, a dedicated `notify::RecommendedWatcher` feeding an mpsc
//! channel a caller drains from its own thread); the ignore-set and the
//! modify/create/delete/move dispatch come from §4.E.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use notify::event::{ModifyKind, RenameMode};

/// Non-dot directory names skipped everywhere a project tree is walked: the
/// watcher, the chunk store's full scan, and the sandbox's `grep`/`peek`
/// traversal. Dot-prefixed names (`.git`, `.rlm`, `.claude`, ...) are caught
/// by the generic rule in [`is_ignored`] instead of being enumerated here.
pub const IGNORED_NAMES: &[&str] = &[
    "node_modules", "__pycache__", "venv", "dist", "build", "target",
];

/// True if a single path segment is itself ignored: one of [`IGNORED_NAMES`]
/// or dot-prefixed, per spec.md §3's ignore set `I`.
pub fn is_ignored_name(name: &str) -> bool {
    name.starts_with('.') || IGNORED_NAMES.contains(&name)
}

/// True if any component of `path` is ignored.
///
/// `path` must already be relative to the project root (or at least share no
/// ignored ancestor above it) — the project root's own location on disk
/// (e.g. a temp directory whose name happens to start with a dot) must never
/// factor into this check. Callers walking a tree themselves should prefer
/// [`is_ignored_name`] against just the current entry's file name, since an
/// ignored ancestor was already skipped on the way down; this function exists
/// for callers like the watcher that receive a path in one shot.
pub fn is_ignored(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(is_ignored_name)
            .unwrap_or(false)
    })
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error(transparent)]
    Notify(#[from] notify::Error),
    #[error("watch channel disconnected")]
    ChannelDisconnected,
}

/// A single filesystem change, already filtered through the ignore-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Watches `root` recursively, delivering filtered [`FileChange`]s over an
/// internal channel. Runs on the thread that constructs it (via `notify`'s
/// own background OS-event thread); callers drain with `wait`/`poll` from a
/// dedicated thread of their own.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    receiver: Receiver<notify::Result<Event>>,
    root: PathBuf,
}

impl FileWatcher {
    pub fn new(root: &Path) -> Result<Self, WatchError> {
        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(move |res| {
            let _ = tx.send(res);
        }, notify::Config::default())?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        Ok(Self {
            _watcher: watcher,
            receiver: rx,
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Block until at least one change is available, or the channel closes.
    pub fn wait(&self) -> Result<Vec<FileChange>, WatchError> {
        loop {
            match self.receiver.recv() {
                Ok(Ok(event)) => {
                    let changes = process_event(event, &self.root);
                    if !changes.is_empty() {
                        return Ok(changes);
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "watch error");
                    return Err(WatchError::Notify(err));
                }
                Err(_) => return Err(WatchError::ChannelDisconnected),
            }
        }
    }

    /// Block up to `timeout`, used by the watcher thread to notice shutdown.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Vec<FileChange>, WatchError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(event)) => Ok(process_event(event, &self.root)),
            Ok(Err(err)) => Err(WatchError::Notify(err)),
            Err(RecvTimeoutError::Timeout) => Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => Err(WatchError::ChannelDisconnected),
        }
    }
}

/// True if `abs_path`'s components *below* `root` include an ignored name.
/// The root's own ancestry (which may itself sit under a dot-prefixed
/// directory, e.g. a temp dir) never enters into the check.
fn is_ignored_under(root: &Path, abs_path: &Path) -> bool {
    match abs_path.strip_prefix(root) {
        Ok(rel) => is_ignored(rel),
        Err(_) => is_ignored(abs_path),
    }
}

/// Translate one `notify::Event` into zero or more [`FileChange`]s.
///
/// A rename delivered as a single two-path event becomes two changes per
/// §4.E: the source is treated as deleted, the destination as created.
/// Ignored paths are dropped here, so callers never see them.
fn process_event(event: Event, root: &Path) -> Vec<FileChange> {
    match event.kind {
        EventKind::Create(_) => event
            .paths
            .into_iter()
            .filter(|p| !is_ignored_under(root, p))
            .map(|path| FileChange { path, kind: ChangeKind::Created })
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .into_iter()
            .filter(|p| !is_ignored_under(root, p))
            .map(|path| FileChange { path, kind: ChangeKind::Deleted })
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let mut paths = event.paths.into_iter();
            let from = paths.next();
            let to = paths.next();
            let mut out = Vec::new();
            if let Some(from) = from {
                if !is_ignored_under(root, &from) {
                    out.push(FileChange { path: from, kind: ChangeKind::Deleted });
                }
            }
            if let Some(to) = to {
                if !is_ignored_under(root, &to) {
                    out.push(FileChange { path: to, kind: ChangeKind::Created });
                }
            }
            out
        }
        EventKind::Modify(_) => event
            .paths
            .into_iter()
            .filter(|p| !is_ignored_under(root, p))
            .map(|path| FileChange { path, kind: ChangeKind::Modified })
            .collect(),
        EventKind::Any | EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}
