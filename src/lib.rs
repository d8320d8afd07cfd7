//! # Bulkfetch
//!
//! A rate-limited bulk fetch engine for batch-querying remote APIs with a
//! pool of credentials, built for long-running jobs that must survive
//! interruption.
//!
//! ## Features
//!
//! - **Multi-Window Rate Limiting**: Per-credential sliding windows (per
//!   second, minute, hour, and day) enforced before every call
//! - **Credential Pooling**: Preferred-credential reuse with automatic
//!   rotation on throttling and revocation on rejection
//! - **Retry Orchestration**: Exponential backoff for transient failures,
//!   bounded rotation budget for rate-limit responses
//! - **Checkpoint/Resume**: Atomic periodic checkpoints so a killed job
//!   restarts exactly where it left off, with no re-fetching
//! - **Batch and Enrichment Modes**: Fetch fresh records or merge fetched
//!   fields into pre-existing seed records
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use bulkfetch::batch::{BatchProcessor, Manifest};
//! use bulkfetch::config::EngineConfig;
//! use bulkfetch::dispatch::{HttpQueryClient, RequestDispatcher};
//! use bulkfetch::limiter::CredentialPool;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::new(vec!["key-a".into(), "key-b".into()]);
//! let pool = Arc::new(CredentialPool::new(config.credentials.clone(), &config.windows));
//! let client = Arc::new(HttpQueryClient::new(
//!     "https://api.example.com/graphql",
//!     "query ($ids: [ID!]!) { items(ids: $ids) { id } }",
//!     config.retry.request_timeout,
//! )?);
//! let dispatcher = Arc::new(RequestDispatcher::new(pool, client, config.retry.clone()));
//!
//! let manifest = Manifest::from_ids(vec!["1".into(), "2".into(), "3".into()]);
//! let processor = BatchProcessor::new(config, dispatcher, "checkpoint.json")?;
//! processor.run(&manifest, "output.json".as_ref()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`limiter`] - Sliding-window rate tracking and the credential pool
//! - [`dispatch`] - Single-request execution with retry, rotation, and
//!   error classification
//! - [`batch`] - Work manifest, result store, and the batch processor
//! - [`checkpoint`] - Atomic checkpoint persistence and resume
//! - [`config`] - Engine configuration and retry policy
//! - [`shutdown`] - Graceful-cancellation coordination
//! - [`stats`] - Run statistics carried across resumes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod limiter;
pub mod metrics;
pub mod shutdown;
pub mod stats;

pub use batch::{BatchProcessor, ItemId, Manifest, ManifestEntry, ResultEntry, ResultStore, RunOutcome, RunReport, WorkItem};
pub use checkpoint::{CheckpointManager, CheckpointState};
pub use config::{EngineConfig, RetryPolicy};
pub use dispatch::{DispatchError, QueryClient, RequestDispatcher};
pub use limiter::{CredentialPool, RateWindow, RateWindowTracker};
pub use stats::{RunStats, StatsSnapshot};
