use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use sheet_ingest::config::WorkerConfig;
use sheet_ingest::pipeline::Pipeline;
use sheet_ingest::store::sqlite::SqliteStore;
use sheet_ingest::worker::Job;
use sheet_ingest::worker::Worker;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Reads newline-delimited `{"id": ..., "data": {...}}` jobs from stdin until EOF.
#[tokio::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let store = SqliteStore::open(&config.database)
        .with_context(|| format!("Failed to open database {}", config.database.display()))?;
    let pipeline = Arc::new(Pipeline::new(Arc::new(store)));
    let worker = Worker::new(pipeline, config.concurrency);
    info!(database = %config.database.display(), concurrency = config.concurrency.get(), "worker started");

    let (sender, receiver) = mpsc::channel(config.concurrency.get() * 2);
    let running = tokio::spawn(worker.run(receiver));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0usize;
    while let Some(line) = lines.next_line().await.context("Failed to read job from stdin")? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Job>(&line) {
            Ok(job) => sender.send(job).await.context("Worker stopped unexpectedly")?,
            Err(e) => warn!(line = line_number, error = %e, "skipping malformed job"),
        }
    }
    drop(sender);

    let report = running.await.context("Worker task failed")?;
    info!(completed = report.completed(), failed = report.failed(), "all jobs processed");
    Ok(())
}
