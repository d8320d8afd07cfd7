//! Checkpoint state: the durable snapshot of job progress.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::batch::manifest::ItemId;
use crate::batch::store::{ResultEntry, ResultStore};
use crate::stats::StatsSnapshot;

/// Current checkpoint schema version.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Errors validating a loaded checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Schema version mismatch.
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Version this build writes.
        expected: String,
        /// Version found in the file.
        found: String,
    },

    /// A processed id has no corresponding result entry.
    #[error("checkpoint invariant violated: processed id {0} has no result entry")]
    MissingEntry(ItemId),
}

/// Full persisted job state.
///
/// Invariants: `processed_ids` only ever grows during a run, and every
/// processed id has a result entry (possibly the no-data marker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    schema_version: String,
    /// Ids that have reached a terminal state.
    pub processed_ids: BTreeSet<ItemId>,
    /// Aggregate results so far.
    pub result_store: ResultStore,
    /// Running call statistics.
    pub stats: StatsSnapshot,
    /// Unix milliseconds of the last update.
    pub timestamp: i64,
}

impl CheckpointState {
    /// Fresh, empty state.
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            processed_ids: BTreeSet::new(),
            result_store: ResultStore::new(),
            stats: StatsSnapshot::default(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Record a terminal outcome for an id: merge the entry and mark the id
    /// processed.
    pub fn mark_processed(&mut self, id: ItemId, entry: ResultEntry) {
        self.result_store.merge(id.clone(), entry);
        self.processed_ids.insert(id);
        self.timestamp = chrono::Utc::now().timestamp_millis();
    }

    /// Whether an id already reached a terminal state.
    pub fn is_processed(&self, id: &str) -> bool {
        self.processed_ids.contains(id)
    }

    /// Number of processed ids.
    pub fn processed_count(&self) -> usize {
        self.processed_ids.len()
    }

    /// Validate the schema version and the processed-id/result invariant.
    pub fn validate(&self) -> Result<(), StateError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(StateError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        for id in &self.processed_ids {
            if !self.result_store.contains(id) {
                return Err(StateError::MissingEntry(id.clone()));
            }
        }
        Ok(())
    }
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self::new()
    }
}
