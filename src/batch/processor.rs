//! Batch processor: drives a manifest to completion.
//!
//! Pulls work items, dispatches them (sequentially or through a fixed-size
//! worker pool over a shared queue), merges terminal outcomes into the
//! result store, checkpoints every K processed ids, and exits cleanly on
//! cancellation with one final save.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use metrics::counter;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::manifest::{ItemId, Manifest, WorkItem};
use super::store::ResultEntry;
use crate::checkpoint::{write_json_atomic, CheckpointError, CheckpointManager, CheckpointState};
use crate::config::{ConfigError, EngineConfig};
use crate::dispatch::{DispatchError, RequestDispatcher};
use crate::shutdown::{self, SharedShutdown};
use crate::stats::StatsSnapshot;

/// Job-level failures. Item-level failures never surface here; they are
/// recorded in the result store as no-data markers.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// No usable credential remains. A resumable checkpoint was saved.
    #[error("credential pool exhausted, run aborted")]
    PoolExhausted,

    /// Internal invariant violation. A resumable checkpoint was saved.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Checkpoint or output persistence failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Manifest exhausted, output written, checkpoint cleared.
    Completed(RunReport),
    /// Cancelled mid-run; a resumable checkpoint was saved.
    Interrupted(RunReport),
}

impl RunOutcome {
    /// The report, whichever way the run ended.
    pub fn report(&self) -> &RunReport {
        match self {
            RunOutcome::Completed(r) | RunOutcome::Interrupted(r) => r,
        }
    }
}

/// Summary of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Ids in a terminal state, including those from previous runs.
    pub processed: u64,
    /// Work items dispatched by this run.
    pub dispatched: u64,
    /// Ids marked permanently failed by this run.
    pub failed_ids: u64,
    /// Call statistics, carried across resumes.
    pub stats: StatsSnapshot,
}

/// Mutable job state shared by workers under one lock, so concurrent
/// completions never race on the same key.
struct JobState {
    state: CheckpointState,
    since_checkpoint: u64,
    dispatched: u64,
    failed_ids: u64,
    abort: Option<JobError>,
}

impl JobState {
    /// Merge a successful dispatch: one entry per id, anything the reply
    /// did not cover is confirmed absent.
    fn apply_entries(&mut self, item: &WorkItem, entries: Vec<(ItemId, ResultEntry)>) {
        for (id, entry) in entries {
            self.state.mark_processed(id, entry);
        }
        for id in item.ids() {
            if !self.state.is_processed(id) {
                self.state.mark_processed(id.clone(), ResultEntry::Absent);
            }
        }
        self.since_checkpoint += item.len() as u64;
        counter!("bulkfetch_items_processed_total").increment(item.len() as u64);
    }

    /// Record an item-level failure: every id gets the no-data marker.
    fn apply_failure(&mut self, item: &WorkItem) {
        for id in item.ids() {
            self.state.mark_processed(id.clone(), ResultEntry::Failed);
        }
        self.failed_ids += item.len() as u64;
        self.since_checkpoint += item.len() as u64;
        counter!("bulkfetch_items_processed_total").increment(item.len() as u64);
    }
}

/// Drives the overall job: work queue, dispatch, merge, checkpoints,
/// cancellation.
pub struct BatchProcessor {
    config: EngineConfig,
    dispatcher: Arc<RequestDispatcher>,
    checkpoints: Arc<CheckpointManager>,
    shutdown: Option<SharedShutdown>,
}

impl BatchProcessor {
    /// Build a processor; validates the configuration.
    pub fn new(
        config: EngineConfig,
        dispatcher: Arc<RequestDispatcher>,
        checkpoint_path: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            dispatcher,
            checkpoints: Arc::new(CheckpointManager::new(checkpoint_path)),
            shutdown: shutdown::get_global_shutdown(),
        })
    }

    /// Attach a shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run the manifest to completion (or interruption), writing the final
    /// merged result store to `output_path` once the manifest is exhausted.
    pub async fn run(&self, manifest: &Manifest, output_path: &Path) -> Result<RunOutcome, JobError> {
        let mut state = match self.checkpoints.load() {
            Ok(Some(state)) => {
                info!(
                    processed = state.processed_count(),
                    total = manifest.len(),
                    "resuming from checkpoint"
                );
                state
            }
            Ok(None) => CheckpointState::new(),
            Err(e) => {
                warn!(error = %e, "unusable checkpoint, starting fresh");
                CheckpointState::new()
            }
        };
        self.dispatcher.stats().restore(&state.stats);

        // Enrichment mode: pre-existing partial records seed the store
        // without clobbering anything restored from the checkpoint.
        for entry in manifest.entries() {
            if let Some(seed) = &entry.seed {
                state.result_store.seed(entry.id.clone(), seed.clone());
            }
        }

        let items = manifest.pending_items(&state.processed_ids, self.config.batch_size);
        info!(
            pending_items = items.len(),
            already_processed = state.processed_count(),
            workers = self.config.workers,
            "starting batch run"
        );

        let shared = Arc::new(Mutex::new(JobState {
            state,
            since_checkpoint: 0,
            dispatched: 0,
            failed_ids: 0,
            abort: None,
        }));

        let interrupted = if self.config.workers <= 1 {
            self.run_sequential(items, &shared).await
        } else {
            self.run_worker_pool(items, &shared).await
        };

        let mut job = shared.lock().await;
        if let Some(abort) = job.abort.take() {
            self.save(&mut job.state)?;
            error!(error = %abort, "run aborted, checkpoint saved");
            return Err(abort);
        }

        job.state.stats = self.dispatcher.stats().snapshot();
        let report = RunReport {
            processed: job.state.processed_count() as u64,
            dispatched: job.dispatched,
            failed_ids: job.failed_ids,
            stats: job.state.stats,
        };

        if interrupted {
            self.save(&mut job.state)?;
            info!(
                processed = report.processed,
                "interrupted, progress checkpointed"
            );
            return Ok(RunOutcome::Interrupted(report));
        }

        // Manifest exhausted: persist the final checkpoint, write the output
        // durably, and only then clear the checkpoint.
        self.save(&mut job.state)?;
        write_json_atomic(output_path, &job.state.result_store)?;
        self.checkpoints.clear()?;
        info!(
            processed = report.processed,
            failed = report.failed_ids,
            output = %output_path.display(),
            "batch run completed"
        );
        Ok(RunOutcome::Completed(report))
    }

    async fn run_sequential(&self, items: Vec<WorkItem>, shared: &Arc<Mutex<JobState>>) -> bool {
        for item in items {
            if self.shutdown_requested() {
                return true;
            }
            let Some(result) = dispatch_cancellable(&self.dispatcher, self.shutdown.as_ref(), &item).await
            else {
                return true;
            };
            let mut job = shared.lock().await;
            job.dispatched += 1;
            if !self.apply_outcome(&mut job, &item, result) {
                return false;
            }
            if job.since_checkpoint >= self.config.checkpoint_interval {
                self.checkpoint_now(&mut job);
            }
        }
        false
    }

    async fn run_worker_pool(&self, items: Vec<WorkItem>, shared: &Arc<Mutex<JobState>>) -> bool {
        let queue: Arc<Mutex<VecDeque<WorkItem>>> = Arc::new(Mutex::new(items.into()));
        let stop = Arc::new(AtomicBool::new(false));
        let interrupted = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(self.config.workers);
        for worker in 0..self.config.workers {
            let queue = Arc::clone(&queue);
            let shared = Arc::clone(shared);
            let stop = Arc::clone(&stop);
            let interrupted = Arc::clone(&interrupted);
            let dispatcher = Arc::clone(&self.dispatcher);
            let checkpoints = Arc::clone(&self.checkpoints);
            let shutdown = self.shutdown.clone();
            let checkpoint_interval = self.config.checkpoint_interval;

            handles.push(tokio::spawn(async move {
                loop {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    if shutdown
                        .as_ref()
                        .map(|s| s.is_shutdown_requested())
                        .unwrap_or(false)
                    {
                        interrupted.store(true, Ordering::SeqCst);
                        break;
                    }
                    let Some(item) = queue.lock().await.pop_front() else {
                        break;
                    };
                    let Some(result) =
                        dispatch_cancellable(&dispatcher, shutdown.as_ref(), &item).await
                    else {
                        interrupted.store(true, Ordering::SeqCst);
                        break;
                    };

                    let mut job = shared.lock().await;
                    job.dispatched += 1;
                    match result {
                        Ok(entries) => job.apply_entries(&item, entries),
                        Err(e) if e.is_job_level() => {
                            job.abort = Some(job_error(e));
                            stop.store(true, Ordering::SeqCst);
                            break;
                        }
                        Err(e) => {
                            warn!(worker, error = %e, ids = ?item.ids(), "item permanently failed");
                            job.apply_failure(&item);
                        }
                    }
                    if job.since_checkpoint >= checkpoint_interval {
                        job.state.stats = dispatcher.stats().snapshot();
                        if let Err(e) = checkpoints.save(&job.state) {
                            warn!(error = %e, "periodic checkpoint save failed");
                        } else {
                            job.since_checkpoint = 0;
                        }
                    }
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task panicked");
                let mut job = shared.lock().await;
                if job.abort.is_none() {
                    job.abort = Some(JobError::Fatal(format!("worker panicked: {e}")));
                }
            }
        }
        interrupted.load(Ordering::SeqCst)
    }

    /// Merge one terminal outcome. Returns `false` when the run must abort.
    fn apply_outcome(
        &self,
        job: &mut JobState,
        item: &WorkItem,
        result: Result<Vec<(ItemId, ResultEntry)>, DispatchError>,
    ) -> bool {
        match result {
            Ok(entries) => {
                job.apply_entries(item, entries);
                true
            }
            Err(e) if e.is_job_level() => {
                job.abort = Some(job_error(e));
                false
            }
            Err(e) => {
                warn!(error = %e, ids = ?item.ids(), "item permanently failed");
                job.apply_failure(item);
                true
            }
        }
    }

    fn checkpoint_now(&self, job: &mut JobState) {
        job.state.stats = self.dispatcher.stats().snapshot();
        match self.checkpoints.save(&job.state) {
            Ok(()) => job.since_checkpoint = 0,
            // A failed periodic save costs resume granularity, nothing more;
            // the next interval or the final save retries.
            Err(e) => warn!(error = %e, "periodic checkpoint save failed"),
        }
    }

    fn save(&self, state: &mut CheckpointState) -> Result<(), CheckpointError> {
        state.stats = self.dispatcher.stats().snapshot();
        self.checkpoints.save(state)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }
}

/// Map a job-level dispatch error to its job error.
fn job_error(e: DispatchError) -> JobError {
    match e {
        DispatchError::PoolExhausted => JobError::PoolExhausted,
        DispatchError::Fatal(m) => JobError::Fatal(m),
        other => JobError::Fatal(format!("unexpected job-level error: {other}")),
    }
}

/// Dispatch one item, abandoning it (not retrying) if shutdown arrives
/// mid-flight. `None` means the item stays pending for the next run.
async fn dispatch_cancellable(
    dispatcher: &RequestDispatcher,
    shutdown: Option<&SharedShutdown>,
    item: &WorkItem,
) -> Option<Result<Vec<(ItemId, ResultEntry)>, DispatchError>> {
    match shutdown {
        // Biased so a dispatch that finishes in the same tick as the
        // shutdown signal still has its result recorded.
        Some(sd) => tokio::select! {
            biased;
            result = dispatcher.execute(item) => Some(result),
            _ = sd.wait_for_shutdown() => None,
        },
        None => Some(dispatcher.execute(item).await),
    }
}
