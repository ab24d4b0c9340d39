//! Docflow processing worker - Main entry point
//!
//! Drains the ingest queue and runs the document pipeline. Several
//! worker processes can run against the same database; the queue lease
//! and per-document lock keep them from stepping on each other.

use anyhow::Result;
use clap::Parser;
use docflow_common::logging::{init_logging, LogConfig};
use std::sync::{atomic::Ordering, Arc};
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use docflow_server::{
    config::Config,
    db,
    pipeline::{
        worker::WorkerDeps, DefaultClassifier, FixedSizeChunker, HttpEmbedder, PostgresIndexer,
        ProcessingWorker, Utf8Extractor, WorkerOptions,
    },
    queue::PostgresQueue,
    retry::RetryPolicy,
    status::PostgresStatusStore,
    storage::{S3ObjectStore, StorageConfig},
};

/// Docflow document processing worker
#[derive(Parser, Debug)]
#[command(name = "docflow-worker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Worker identity written into document locks (defaults to
    /// "<hostname>-<pid>")
    #[arg(long, env = "WORKER_ID")]
    worker_id: Option<String>,

    /// Stop after handling this many messages (smoke runs)
    #[arg(long)]
    max_iterations: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .log_file_prefix("docflow-worker".to_string())
        .filter_directives(if cli.verbose {
            "docflow_server=trace,sqlx=debug".to_string()
        } else {
            "docflow_server=debug,sqlx=info".to_string()
        })
        .build();

    // Merge with environment variables (they take precedence)
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    init_logging(&log_config)?;

    let worker_id = match cli.worker_id {
        Some(id) => id,
        None => default_worker_id(),
    };

    info!(worker_id = %worker_id, "Starting Docflow Worker");

    let config = Config::load()?;

    let db_pool = db::create_pool(&config.database).await?;
    info!("Database connection pool established");

    let storage_config = StorageConfig::from_env()?;
    let objects = S3ObjectStore::new(storage_config).await?;
    info!("Storage client initialized");

    let deps = WorkerDeps {
        status: Arc::new(PostgresStatusStore::new(db_pool.clone())),
        objects: Arc::new(objects),
        queue: Arc::new(PostgresQueue::new(
            db_pool.clone(),
            config.queue.max_receive_count,
        )),
        classifier: Arc::new(DefaultClassifier),
        extractor: Arc::new(Utf8Extractor),
        chunker: Arc::new(FixedSizeChunker::new(
            config.worker.chunk_size,
            config.worker.chunk_overlap,
        )),
        embedder: Arc::new(HttpEmbedder::new(
            config.worker.embed_endpoint.clone(),
            config.worker.embed_batch_size,
        )),
        indexer: Arc::new(PostgresIndexer::new(db_pool.clone())),
    };

    let retry = RetryPolicy::from_config(&config.retry).with_on_retry(Box::new(
        |attempt, err, delay| {
            warn!(
                attempt,
                kind = %err.kind,
                delay_ms = delay.as_millis() as u64,
                "Transient failure, will retry: {}",
                err.message
            );
        },
    ));

    let options = WorkerOptions {
        worker_id,
        wait: Duration::from_secs(config.queue.wait_secs),
        lease: Duration::from_secs(config.queue.lease_secs),
        poll_error_backoff: Duration::from_secs(config.worker.poll_error_backoff_secs),
        max_iterations: cli.max_iterations,
    };

    let worker = ProcessingWorker::new(deps, retry, options);

    // Flip the shutdown flag on Ctrl+C or SIGTERM; the worker finishes
    // its current message and exits.
    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested, finishing current message");
        shutdown.store(true, Ordering::Relaxed);
    });

    worker.run().await;

    let stats = worker.stats();
    info!(
        processed = stats.processed,
        failed = stats.failed,
        skipped = stats.skipped,
        "Worker exited"
    );

    Ok(())
}

fn default_worker_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "worker".to_string());
    format!("{}-{}", host, std::process::id())
}

/// Resolves when Ctrl+C or SIGTERM is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
