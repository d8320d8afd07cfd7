//! Checkpoint/resume subsystem.
//!
//! Persists {processed ids, result store, stats} atomically and reconstructs
//! the identical state on restart. The checkpoint is deleted only after the
//! final output has been durably written.

pub mod manager;
pub mod state;

pub use manager::{write_json_atomic, CheckpointError, CheckpointManager, MAX_STATE_FILE_SIZE};
pub use state::{CheckpointState, StateError, SCHEMA_VERSION};
