//! Work manifest, result store, and the processor that drives them.

pub mod manifest;
pub mod processor;
pub mod store;

pub use manifest::{ItemId, Manifest, ManifestEntry, WorkItem};
pub use processor::{BatchProcessor, JobError, RunOutcome, RunReport};
pub use store::{ResultEntry, ResultStore};
