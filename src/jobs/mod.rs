// src/jobs/mod.rs
//! In-process asynchronous job queue.
//!
//! `add_job` records a `Pending` job and returns its id at once; processing is
//! spawned onto the runtime. Each job type has at most one processor. Jobs are
//! kept for the lifetime of the process so callers can poll them.

pub mod fact_check;
pub mod processors;
pub mod types;

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;

pub use types::{Job, JobPayload, JobStats, JobStatus, JobType};

pub const NO_PROCESSOR: &str = "no processor registered";

/// Handles every job of one type.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, payload: &JobPayload) -> anyhow::Result<serde_json::Value>;
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("jobs_enqueued_total", "Jobs accepted by the queue.");
        describe_counter!("jobs_completed_total", "Jobs whose processor returned Ok.");
        describe_counter!(
            "jobs_failed_total",
            "Jobs that failed (processor error, timeout, panic, or no processor)."
        );
    });
}

#[derive(Debug, Default)]
struct JobTable {
    by_id: HashMap<String, Job>,
    /// Creation order, for listing.
    order: Vec<String>,
}

pub struct JobQueue {
    jobs: RwLock<JobTable>,
    processors: RwLock<HashMap<JobType, Arc<dyn JobProcessor>>>,
    processor_timeout: Duration,
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|poison| poison.into_inner())
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|poison| poison.into_inner())
}

impl JobQueue {
    pub fn new(processor_timeout: Duration) -> Arc<Self> {
        ensure_metrics_described();
        Arc::new(Self {
            jobs: RwLock::new(JobTable::default()),
            processors: RwLock::new(HashMap::new()),
            processor_timeout,
        })
    }

    /// Associates `processor` with `job_type`, replacing (and returning) any previous one.
    pub fn register_processor(
        &self,
        job_type: JobType,
        processor: Arc<dyn JobProcessor>,
    ) -> Option<Arc<dyn JobProcessor>> {
        let previous = write(&self.processors).insert(job_type, processor);
        if previous.is_some() {
            tracing::info!(target: "jobs", job_type = %job_type, "processor replaced");
        } else {
            tracing::info!(target: "jobs", job_type = %job_type, "processor registered");
        }
        previous
    }

    /// Creates a `Pending` job and dispatches it in the background.
    /// Must be called inside a tokio runtime.
    pub fn add_job(self: &Arc<Self>, payload: JobPayload) -> String {
        let job = Job::new(payload);
        let id = job.id.clone();
        let job_type = job.job_type();
        {
            let mut table = write(&self.jobs);
            table.order.push(id.clone());
            table.by_id.insert(id.clone(), job);
        }
        counter!("jobs_enqueued_total", "type" => job_type.as_str()).increment(1);
        tracing::info!(target: "jobs", job_id = %id, job_type = %job_type, "job enqueued");

        let this = Arc::clone(self);
        let job_id = id.clone();
        tokio::spawn(async move { this.process(&job_id).await });
        id
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        read(&self.jobs).by_id.get(id).cloned()
    }

    /// All jobs in creation order.
    pub fn get_all_jobs(&self) -> Vec<Job> {
        let table = read(&self.jobs);
        table
            .order
            .iter()
            .filter_map(|id| table.by_id.get(id).cloned())
            .collect()
    }

    /// Counts by status, taken under one lock so they always sum to `total`.
    pub fn get_stats(&self) -> JobStats {
        let table = read(&self.jobs);
        let mut stats = JobStats {
            total: table.by_id.len(),
            ..Default::default()
        };
        for job in table.by_id.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    async fn process(&self, id: &str) {
        let payload = {
            let mut table = write(&self.jobs);
            let Some(job) = table.by_id.get_mut(id) else {
                tracing::error!(target: "jobs", job_id = %id, "dispatched job vanished");
                return;
            };
            if let Err(e) = job.start(Utc::now()) {
                tracing::error!(target: "jobs", job_id = %id, error = %e, "job not dispatchable");
                return;
            }
            job.payload.clone()
        };
        let job_type = payload.job_type();

        let processor = read(&self.processors).get(&job_type).cloned();
        let outcome = match processor {
            Some(p) => self.invoke(p, payload).await,
            None => {
                tracing::error!(
                    target: "jobs",
                    job_id = %id,
                    job_type = %job_type,
                    "no processor registered for job type"
                );
                Err(NO_PROCESSOR.to_string())
            }
        };

        let mut table = write(&self.jobs);
        let Some(job) = table.by_id.get_mut(id) else {
            return;
        };
        let now = Utc::now();
        let applied = match outcome {
            Ok(value) => {
                counter!("jobs_completed_total", "type" => job_type.as_str()).increment(1);
                tracing::info!(target: "jobs", job_id = %id, job_type = %job_type, "job completed");
                job.complete(value, now)
            }
            Err(error) => {
                counter!("jobs_failed_total", "type" => job_type.as_str()).increment(1);
                tracing::warn!(target: "jobs", job_id = %id, job_type = %job_type, error = %error, "job failed");
                job.fail(error, now)
            }
        };
        if let Err(e) = applied {
            tracing::error!(target: "jobs", job_id = %id, error = %e, "job outcome dropped");
        }
    }

    /// Runs the processor in its own task so a panic or a timeout only fails this job.
    async fn invoke(
        &self,
        processor: Arc<dyn JobProcessor>,
        payload: JobPayload,
    ) -> Result<serde_json::Value, String> {
        let mut handle = tokio::spawn(async move { processor.process(&payload).await });
        match tokio::time::timeout(self.processor_timeout, &mut handle).await {
            Err(_) => {
                handle.abort();
                Err(format!(
                    "processor timed out after {}s",
                    self.processor_timeout.as_secs_f32()
                ))
            }
            Ok(Err(join_err)) if join_err.is_panic() => Err("processor panicked".to_string()),
            Ok(Err(_)) => Err("processor cancelled".to_string()),
            Ok(Ok(Err(e))) => Err(format!("{e:#}")),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }
}
