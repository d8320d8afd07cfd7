//! Durable checkpoint persistence with atomic replace.
//!
//! Saves go through a temp file in the same directory followed by an atomic
//! rename, so a crash mid-write never corrupts the last good checkpoint.
//! An advisory file lock coordinates concurrent processes sharing a
//! checkpoint path.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use fd_lock::RwLock;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::state::{CheckpointState, StateError};

/// Maximum checkpoint file size accepted on load, guarding against memory
/// exhaustion from a damaged or foreign file.
pub const MAX_STATE_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Checkpoint persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// File lock error.
    #[error("lock error: {0}")]
    Lock(String),

    /// State file larger than the accepted maximum.
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size.
        size: u64,
        /// Accepted maximum.
        max: u64,
    },

    /// A loaded state failed validation.
    #[error(transparent)]
    Invalid(#[from] StateError),
}

/// Serialize a value to JSON and write it to `path` atomically: temp file in
/// the same directory, flush, fsync, rename, then fsync the directory.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io(e.to_string()))?;
    }

    let json =
        serde_json::to_string_pretty(value).map_err(|e| CheckpointError::Serialization(e.to_string()))?;

    let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
        .map_err(|e| CheckpointError::Io(format!("failed to create temp file: {e}")))?;
    temp_file
        .write_all(json.as_bytes())
        .map_err(|e| CheckpointError::Io(format!("failed to write temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| CheckpointError::Io(format!("failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| CheckpointError::Io(format!("failed to sync temp file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| CheckpointError::Io(format!("failed to persist temp file: {e}")))?;

    // Make the rename itself durable.
    if let Some(parent) = path.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Read and deserialize a JSON file, enforcing the size guard.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CheckpointError> {
    let metadata = std::fs::metadata(path).map_err(|e| CheckpointError::Io(e.to_string()))?;
    if metadata.len() > MAX_STATE_FILE_SIZE {
        return Err(CheckpointError::StateTooLarge {
            size: metadata.len(),
            max: MAX_STATE_FILE_SIZE,
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| CheckpointError::Io(e.to_string()))?;
    serde_json::from_str(&contents).map_err(|e| {
        warn!(error = %e, "failed to deserialize checkpoint");
        CheckpointError::Deserialization(e.to_string())
    })
}

/// Owns one checkpoint file and its lifecycle.
pub struct CheckpointManager {
    path: PathBuf,
}

impl CheckpointManager {
    /// Manage the checkpoint at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The checkpoint file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the full state atomically under an exclusive lock.
    pub fn save(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
        debug!(
            path = %self.path.display(),
            processed = state.processed_count(),
            "saving checkpoint"
        );

        let file = self.lock_file()?;
        let mut lock = RwLock::new(file);
        let _guard = lock
            .write()
            .map_err(|e| CheckpointError::Lock(format!("failed to acquire write lock: {e}")))?;

        write_json_atomic(&self.path, state)?;

        counter!("bulkfetch_checkpoints_total").increment(1);
        info!(
            path = %self.path.display(),
            processed = state.processed_count(),
            total_calls = state.stats.total_calls,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Load the most recent valid checkpoint, or `None` if none exists.
    ///
    /// A present but invalid file is an error; callers decide whether to
    /// start fresh.
    pub fn load(&self) -> Result<Option<CheckpointState>, CheckpointError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no checkpoint found");
            return Ok(None);
        }

        let guard_file = self.lock_file()?;
        let lock = RwLock::new(guard_file);
        let _guard = lock
            .read()
            .map_err(|e| CheckpointError::Lock(format!("failed to acquire read lock: {e}")))?;

        let state: CheckpointState = read_json(&self.path)?;
        state.validate()?;

        info!(
            path = %self.path.display(),
            processed = state.processed_count(),
            "checkpoint loaded"
        );
        Ok(Some(state))
    }

    /// Remove the checkpoint file.
    ///
    /// Only valid after the manifest is fully processed and the final output
    /// has been durably written.
    pub fn clear(&self) -> Result<(), CheckpointError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| CheckpointError::Io(e.to_string()))?;
            info!(path = %self.path.display(), "checkpoint cleared after completion");
        }
        let lock_path = self.path.with_extension("lock");
        if lock_path.exists() {
            let _ = std::fs::remove_file(lock_path);
        }
        Ok(())
    }

    fn lock_file(&self) -> Result<std::fs::File, CheckpointError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io(e.to_string()))?;
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.path.with_extension("lock"))
            .map_err(|e| CheckpointError::Lock(format!("failed to open lock file: {e}")))
    }
}
