//! On-disk chunk store: `.rlm/chunks/<relpath>/`.
//!
//! New subsystem relative to the teacher; the atomic temp-dir-then-rename
//! update and the mtime-gated skip are the same "crash safe write" idiom the
//! sandbox's namespace snapshot uses (see `rlm-sandbox::state`), and the
//! initial full-tree scan reuses the teacher's `rayon`-parallel multi-file
//! pattern from `rskim`'s CLI (`process_files`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::StoreError;

pub const CHUNK_SIZE: usize = 200;
pub const OVERLAP: usize = 20;
const TEXT_PROBE_BYTES: usize = 8192;

/// `(start, end)` line ranges, 1-indexed and inclusive, covering `total_lines`.
///
/// Mirrors §4.D's recurrence exactly: `end = min(start + size - 1, total)`,
/// next `start = end + 1 - overlap`, loop halts once an emitted chunk's end
/// reaches `total_lines`. Rejected up front when `overlap >= size`, since
/// that configuration does not advance `start` and would loop forever — the
/// pathological case the spec flags as one to reject at configuration time
/// rather than detect mid-loop.
pub fn chunk_boundaries(total_lines: usize, size: usize, overlap: usize) -> Result<Vec<(usize, usize)>, StoreError> {
    if size == 0 || overlap >= size {
        return Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("chunk overlap ({overlap}) must be smaller than chunk size ({size})"),
        )));
    }
    if total_lines == 0 {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::new();
    let mut start = 1usize;
    loop {
        let end = (start + size - 1).min(total_lines);
        chunks.push((start, end));
        if end == total_lines {
            break;
        }
        start = end + 1 - overlap;
    }
    Ok(chunks)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    mtime: u64,
    total_lines: usize,
    chunks: Vec<(usize, usize)>,
}

/// Result of `chunks_list`.
#[derive(Debug, Clone)]
pub enum ChunkListing {
    Ready { manifest_json: serde_json::Value },
    Pending,
}

/// Result of `chunks_read`.
#[derive(Debug, Clone)]
pub struct ChunkRead {
    pub content: String,
    pub chunk: usize,
    pub total_chunks: usize,
    pub lines: String,
}

/// Owns `.rlm/chunks/` under a project root.
pub struct ChunkStore {
    state_dir: PathBuf,
}

impl ChunkStore {
    pub fn new(project_root: &Path) -> Self {
        Self {
            state_dir: project_root.join(".rlm").join("chunks"),
        }
    }

    fn chunk_dir(&self, rel: &Path) -> PathBuf {
        self.state_dir.join(rel)
    }

    /// Update the chunk directory for `rel` (relative to the project root),
    /// reading its current bytes from `abs_path`. No-op if the manifest's
    /// recorded mtime already matches, or if the file isn't text.
    pub fn update(&self, rel: &Path, abs_path: &Path) -> Result<(), StoreError> {
        let metadata = fs::metadata(abs_path)?;
        let mtime = mtime_secs(metadata.modified()?);
        let dir = self.chunk_dir(rel);

        if let Some(existing) = self.read_manifest(&dir) {
            if existing.mtime == mtime {
                return Ok(());
            }
        }

        let bytes = fs::read(abs_path)?;
        if !is_text(&bytes) {
            return Ok(());
        }

        let text = String::from_utf8_lossy(&bytes);
        let total_lines = rlm_core::count_lines(&text);
        let boundaries = chunk_boundaries(total_lines, CHUNK_SIZE, OVERLAP)?;
        let lines: Vec<&str> = text.split('\n').collect();

        let parent = dir.parent().map(PathBuf::from).unwrap_or_else(|| self.state_dir.clone());
        fs::create_dir_all(&parent)?;
        let tmp_dir = parent.join(format!(
            ".{}.tmp-{}",
            rel.file_name().and_then(|n| n.to_str()).unwrap_or("chunk"),
            std::process::id()
        ));
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        let rel_display = rel.to_string_lossy().replace('\\', "/");
        let write_result = (|| -> Result<(), StoreError> {
            for (i, (start, end)) in boundaries.iter().enumerate() {
                let body = lines[(start - 1)..*end].join("\n");
                let header = format!("# {rel_display} lines {start}-{end}\n");
                let file_path = tmp_dir.join(format!("chunk_{i:03}.txt"));
                fs::write(file_path, format!("{header}{body}"))?;
            }
            let manifest = Manifest {
                mtime,
                total_lines,
                chunks: boundaries.clone(),
            };
            let manifest_path = tmp_dir.join("manifest.json");
            fs::write(manifest_path, serde_json::to_vec_pretty(&manifest)?)?;
            Ok(())
        })();

        if let Err(err) = write_result {
            let _ = fs::remove_dir_all(&tmp_dir);
            return Err(err);
        }

        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::rename(&tmp_dir, &dir)?;
        Ok(())
    }

    /// Remove the chunk directory for a deleted source file.
    pub fn remove(&self, rel: &Path) -> Result<(), StoreError> {
        let dir = self.chunk_dir(rel);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn list(&self, rel: &Path) -> ChunkListing {
        let dir = self.chunk_dir(rel);
        match self.read_manifest(&dir) {
            Some(manifest) => ChunkListing::Ready {
                manifest_json: serde_json::json!({
                    "mtime": manifest.mtime,
                    "total_lines": manifest.total_lines,
                    "chunks": manifest.chunks,
                }),
            },
            None => ChunkListing::Pending,
        }
    }

    pub fn read(&self, rel: &Path, index: usize) -> Result<ChunkRead, StoreError> {
        let dir = self.chunk_dir(rel);
        let manifest = self.read_manifest(&dir).ok_or(StoreError::Pending)?;
        if index >= manifest.chunks.len() {
            return Err(StoreError::ChunkOutOfRange(index, manifest.chunks.len()));
        }
        let (start, end) = manifest.chunks[index];
        let content = fs::read_to_string(dir.join(format!("chunk_{index:03}.txt")))?;
        Ok(ChunkRead {
            content,
            chunk: index,
            total_chunks: manifest.chunks.len(),
            lines: format!("{start}-{end}"),
        })
    }

    fn read_manifest(&self, dir: &Path) -> Option<Manifest> {
        let bytes = fs::read(dir.join("manifest.json")).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Walk `project_root` honoring the fixed ignore-set and chunk every
    /// text file found, in parallel. Intended to run on a background thread
    /// started at daemon startup; does not block request serving.
    pub fn full_scan(&self, project_root: &Path) {
        let files: Vec<PathBuf> = WalkBuilder::new(project_root)
            .hidden(true)
            .git_ignore(false)
            .git_exclude(false)
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| !rlm_watch::is_ignored_name(name))
                    .unwrap_or(true)
            })
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.into_path())
            .collect();

        files.par_iter().for_each(|abs_path| {
            if let Ok(rel) = abs_path.strip_prefix(project_root) {
                if let Err(err) = self.update(rel, abs_path) {
                    tracing::warn!(path = %abs_path.display(), error = %err, "chunk scan failed for file");
                }
            }
        });
    }
}

fn mtime_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn is_text(bytes: &[u8]) -> bool {
    let probe = &bytes[..bytes.len().min(TEXT_PROBE_BYTES)];
    std::str::from_utf8(probe).is_ok()
}
