//! Job consumer: runs queued jobs through the pipeline with bounded concurrency.
use crate::pipeline::Pipeline;
use crate::store::Transition;
use serde::Deserialize;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio::task::JoinSet;
use tracing::error;
use tracing::info;

/// A queued job: the queue's job id and the raw payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Job {
    pub id: String,
    pub data: Value,
}

/// Result reported for each job.
#[derive(Clone, Debug, PartialEq)]
pub enum JobOutcome {
    Completed { job_id: String, transition: Transition },
    Failed { job_id: String, message: String },
}

impl JobOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            JobOutcome::Completed { job_id, .. } | JobOutcome::Failed { job_id, .. } => job_id,
        }
    }
}

/// Outcomes of every job handled before the queue closed, in completion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkerReport {
    pub outcomes: Vec<JobOutcome>,
}

impl WorkerReport {
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|outcome| matches!(outcome, JobOutcome::Completed { .. })).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.completed()
    }

    fn record(&mut self, joined: Result<JobOutcome, JoinError>) {
        match joined {
            Ok(outcome) => self.outcomes.push(outcome),
            Err(e) => error!(error = %e, "job task aborted"),
        }
    }
}

pub struct Worker {
    pipeline: Arc<Pipeline>,
    concurrency: NonZeroUsize,
}

impl Worker {
    pub fn new(pipeline: Arc<Pipeline>, concurrency: NonZeroUsize) -> Self {
        Self { pipeline, concurrency }
    }

    /// Consumes jobs until the channel closes and every started job has finished.
    ///
    /// At most `concurrency` jobs run at once, each on the blocking thread pool.
    pub async fn run(self, mut jobs: mpsc::Receiver<Job>) -> WorkerReport {
        let semaphore = Arc::new(Semaphore::new(self.concurrency.get()));
        let mut tasks = JoinSet::new();
        let mut report = WorkerReport::default();

        while let Some(job) = jobs.recv().await {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            while let Some(joined) = tasks.try_join_next() {
                report.record(joined);
            }

            let pipeline = self.pipeline.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let job_id = job.id;
                let data = job.data;
                let result = tokio::task::spawn_blocking(move || pipeline.process(&data)).await;
                match result {
                    Ok(Ok(transition)) => {
                        info!(job_id = %job_id, transition = transition.as_str(), "job completed");
                        JobOutcome::Completed { job_id, transition }
                    }
                    Ok(Err(e)) => {
                        error!(job_id = %job_id, error = %e, "job failed");
                        JobOutcome::Failed { job_id, message: e.to_string() }
                    }
                    Err(e) => {
                        error!(job_id = %job_id, error = %e, "job panicked");
                        JobOutcome::Failed { job_id, message: e.to_string() }
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            report.record(joined);
        }
        info!(completed = report.completed(), failed = report.failed(), "worker stopped");
        report
    }
}
