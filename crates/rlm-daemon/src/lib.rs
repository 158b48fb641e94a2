//! RLM navigator daemon: TCP request dispatcher, session statistics, port
//! probing, and idle self-shutdown.
//!
//! ARCHITECTURE: this crate is the only one in the workspace that performs
//! network I/O. It owns one [`rlm_store::SkeletonCache`], one
//! [`rlm_store::ChunkStore`], and one [`rlm_sandbox::Sandbox`] for the
//! lifetime of the process, wires a [`rlm_watch::FileWatcher`] to feed them
//! invalidations, and exposes them to clients through [`dispatch::Dispatcher`]
//! over [`server::Server`].

pub mod confinement;
pub mod dispatch;
pub mod server;
pub mod stats;

pub use dispatch::Dispatcher;
pub use server::Server;
pub use stats::SessionStats;

/// Errors surfaced by the daemon crate itself (as opposed to action-level
/// failures, which the dispatcher reports inline as `{error: ...}` per
/// spec.md §7 rather than as a transport-level `Result::Err`).
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("no free port in {start}..{end}")]
    NoFreePort { start: u16, end: u16 },

    #[error("project root does not exist or is not a directory: {0}")]
    InvalidRoot(std::path::PathBuf),
}
