//! Job manifest: the ordered collection of ids a run must fetch.

use std::collections::BTreeSet;

use serde_json::Value;

/// Opaque identifier of a single record at the remote service.
pub type ItemId = String;

/// One unit of fetch work: one id, or several batched together when the
/// service supports batched lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    ids: Vec<ItemId>,
}

impl WorkItem {
    /// Build a work item from a non-empty id list.
    pub fn new(ids: Vec<ItemId>) -> Self {
        debug_assert!(!ids.is_empty(), "work item must carry at least one id");
        Self { ids }
    }

    /// The ids this item looks up.
    pub fn ids(&self) -> &[ItemId] {
        &self.ids
    }

    /// Number of ids in the item.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the item carries no ids.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// One manifest entry: an id, optionally with a pre-existing partial record
/// that seeds the result store (the enrichment mode).
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    /// The record id.
    pub id: ItemId,
    /// Pre-existing partial record, if any.
    pub seed: Option<Value>,
}

/// Ordered collection of ids supplied by the domain adapter at job start.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Manifest of bare ids.
    pub fn from_ids(ids: impl IntoIterator<Item = ItemId>) -> Self {
        Self {
            entries: ids
                .into_iter()
                .map(|id| ManifestEntry { id, seed: None })
                .collect(),
        }
    }

    /// Manifest of ids with pre-existing partial records to enrich.
    pub fn with_seeds(entries: impl IntoIterator<Item = (ItemId, Value)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(id, seed)| ManifestEntry {
                    id,
                    seed: Some(seed),
                })
                .collect(),
        }
    }

    /// All entries, in manifest order.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Number of ids in the manifest.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the work items still to be dispatched, in manifest order,
    /// skipping ids already in `processed` and grouping up to `batch_size`
    /// ids per item.
    pub fn pending_items(&self, processed: &BTreeSet<ItemId>, batch_size: usize) -> Vec<WorkItem> {
        let batch_size = batch_size.max(1);
        let mut items = Vec::new();
        let mut current: Vec<ItemId> = Vec::with_capacity(batch_size);
        for entry in &self.entries {
            if processed.contains(&entry.id) {
                continue;
            }
            current.push(entry.id.clone());
            if current.len() == batch_size {
                items.push(WorkItem::new(std::mem::take(&mut current)));
                current = Vec::with_capacity(batch_size);
            }
        }
        if !current.is_empty() {
            items.push(WorkItem::new(current));
        }
        items
    }
}
