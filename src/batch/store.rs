//! In-memory result store keyed by item id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::manifest::ItemId;

/// Terminal result for one id. Never holds partial or corrupt data.
///
/// `Absent` is a successful confirmation that the service has nothing for
/// the id; `Failed` is the engine's no-data marker after a permanent local
/// failure. The two are deliberately distinguishable in the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "payload", rename_all = "snake_case")]
pub enum ResultEntry {
    /// Successfully parsed payload.
    Data(Value),
    /// Service confirmed it has no data for this id.
    Absent,
    /// Permanent failure; fetched again only on a fresh manifest run.
    Failed,
}

impl ResultEntry {
    /// Whether this entry carries a payload.
    pub fn is_data(&self) -> bool {
        matches!(self, ResultEntry::Data(_))
    }

    /// Whether this entry is the permanent-failure marker.
    pub fn is_failed(&self) -> bool {
        matches!(self, ResultEntry::Failed)
    }
}

/// Aggregate result store, ordered for deterministic serialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultStore {
    entries: BTreeMap<ItemId, ResultEntry>,
}

impl ResultStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an id with a pre-existing partial record, unless the store
    /// already holds an entry for it (e.g. restored from a checkpoint).
    pub fn seed(&mut self, id: ItemId, value: Value) {
        self.entries.entry(id).or_insert(ResultEntry::Data(value));
    }

    /// Merge a terminal entry for an id.
    ///
    /// When both the existing and incoming entries are JSON objects the
    /// incoming fields are merged over the seed, preserving enrichment
    /// context; any other combination replaces the existing entry.
    pub fn merge(&mut self, id: ItemId, entry: ResultEntry) {
        match (self.entries.get_mut(&id), entry) {
            (Some(ResultEntry::Data(Value::Object(existing))), ResultEntry::Data(Value::Object(incoming))) => {
                for (k, v) in incoming {
                    existing.insert(k, v);
                }
            }
            (_, entry) => {
                self.entries.insert(id, entry);
            }
        }
    }

    /// Entry for an id, if present.
    pub fn get(&self, id: &str) -> Option<&ResultEntry> {
        self.entries.get(id)
    }

    /// Whether the store holds any entry for the id.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &ResultEntry)> {
        self.entries.iter()
    }
}
