//! Skeleton cache, chunk store, and response truncation.
//!
//! ARCHITECTURE: this crate owns every piece of server-side state that is
//! derived from file contents rather than the AST primitives in `rlm-core`
//! directly. `rlm-daemon` holds one [`SkeletonCache`] and one [`ChunkStore`]
//! for the lifetime of the process; both are safe to share across threads.

mod cache;
mod chunks;
mod truncate;

pub use cache::{is_supported, SkeletonCache};
pub use chunks::{chunk_boundaries, ChunkListing, ChunkRead, ChunkStore, CHUNK_SIZE, OVERLAP};
pub use truncate::{truncate, RESPONSE_CAP};

/// Errors from cache lookups or chunk-store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] rlm_core::CoreError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("chunk {0} out of range (file has {1} chunks)")]
    ChunkOutOfRange(usize, usize),

    #[error("file not yet chunked")]
    Pending,
}
