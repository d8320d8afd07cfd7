//! Example: fetch a batch of records through the full engine.
//!
//! Run with:
//! ```bash
//! BULKFETCH_TOKENS=key1,key2 cargo run --example run_job
//! ```

use std::sync::Arc;

use bulkfetch::batch::{BatchProcessor, Manifest, RunOutcome};
use bulkfetch::config::EngineConfig;
use bulkfetch::dispatch::{HttpQueryClient, RequestDispatcher};
use bulkfetch::limiter::CredentialPool;
use bulkfetch::shutdown::{self, ShutdownCoordinator};

const QUERY: &str = "query ($ids: [ID!]!) { records(ids: $ids) { id name tier } }";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    bulkfetch::metrics::describe_metrics();

    let tokens: Vec<String> = std::env::var("BULKFETCH_TOKENS")
        .unwrap_or_default()
        .split(',')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if tokens.is_empty() {
        eprintln!("set BULKFETCH_TOKENS to a comma-separated list of API keys");
        std::process::exit(1);
    }

    let mut config = EngineConfig::new(tokens);
    config.batch_size = 10;
    config.workers = 4;

    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    shutdown::spawn_ctrl_c_listener(shutdown.clone());

    let pool = Arc::new(CredentialPool::with_margin(
        config.credentials.clone(),
        &config.windows,
        config.acquire_margin,
    ));
    let client = Arc::new(HttpQueryClient::new(
        "https://api.example.com/graphql",
        QUERY,
        config.retry.request_timeout,
    )?);
    let dispatcher = Arc::new(RequestDispatcher::new(pool, client, config.retry.clone()));

    let manifest = Manifest::from_ids((1..=100).map(|i| i.to_string()));
    let processor = BatchProcessor::new(config, dispatcher, "run_job.checkpoint.json")?
        .with_shutdown(shutdown);

    match processor.run(&manifest, "run_job.output.json".as_ref()).await? {
        RunOutcome::Completed(report) => {
            println!(
                "completed: {} processed, {} failed, {} calls",
                report.processed, report.failed_ids, report.stats.total_calls
            );
        }
        RunOutcome::Interrupted(report) => {
            println!(
                "interrupted: {} processed so far, rerun to resume",
                report.processed
            );
        }
    }
    Ok(())
}
