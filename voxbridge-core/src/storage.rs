//! Model acquisition into a persistent on-disk cache.
//!
//! ## Layout
//!
//! ```text
//! <storage_root>/<cache key of model_ref>/
//!     ...model files...
//!     .voxbridge-cached      ← written last; its presence means "complete"
//! ```
//!
//! The marker is written after the copy finishes, so an interrupted copy is
//! redone on the next start rather than loaded half-way.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Result, VoxError};

/// File whose presence marks a fully cached model directory.
pub const CACHE_MARKER: &str = ".voxbridge-cached";

/// Persistent model storage.
#[async_trait]
pub trait ModelStore: Send + Sync + 'static {
    /// Make `model_ref` available as an unpacked directory at `destination`.
    ///
    /// # Errors
    /// `VoxError::ModelLoad` if the model cannot be acquired.
    async fn ensure_cached(&self, model_ref: &str, destination: &Path) -> Result<()>;
}

/// Directory name a model reference is cached under.
pub fn cache_key(model_ref: &str) -> String {
    let trimmed = model_ref.trim().trim_end_matches(['/', '\\']);
    let last = trimmed
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("model");
    last.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn is_cached(destination: &Path) -> bool {
    destination.join(CACHE_MARKER).is_file()
}

/// Caches model directories from the local filesystem.
///
/// `model_ref` is a path to an unpacked model directory; it is copied into
/// the destination the first time and reused afterwards.
#[derive(Debug, Clone, Default)]
pub struct DirModelStore;

impl DirModelStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModelStore for DirModelStore {
    async fn ensure_cached(&self, model_ref: &str, destination: &Path) -> Result<()> {
        if is_cached(destination) {
            debug!(path = %destination.display(), "model already cached");
            return Ok(());
        }

        let source = PathBuf::from(model_ref);
        let destination = destination.to_path_buf();
        let marker_body = model_ref.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            if !source.is_dir() {
                return Err(VoxError::ModelLoad(format!(
                    "model source {} is not a directory",
                    source.display()
                )));
            }
            info!(
                from = %source.display(),
                to = %destination.display(),
                "caching model"
            );
            copy_dir_recursive(&source, &destination)
                .map_err(|e| VoxError::ModelLoad(format!("copy failed: {e}")))?;
            fs::write(destination.join(CACHE_MARKER), marker_body)
                .map_err(|e| VoxError::ModelLoad(format!("marker write failed: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| VoxError::ModelLoad(format!("cache task failed: {e}")))?
    }
}

fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}
