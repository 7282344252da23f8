// src/stats.rs
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::{Alert, AlertLevel};
use crate::jobs::{Job, JobQueue, JobStats, JobStatus};
use crate::store::AlertRepository;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeRange {
    #[default]
    #[serde(rename = "1d")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Day => "1d",
            TimeRange::Week => "7d",
            TimeRange::Month => "30d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            TimeRange::Day => Duration::days(1),
            TimeRange::Week => Duration::days(7),
            TimeRange::Month => Duration::days(30),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown time range {0:?} (expected 1d, 7d or 30d)")]
pub struct UnknownTimeRange(pub String);

impl FromStr for TimeRange {
    type Err = UnknownTimeRange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1d" => Ok(TimeRange::Day),
            "7d" => Ok(TimeRange::Week),
            "30d" => Ok(TimeRange::Month),
            other => Err(UnknownTimeRange(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobBreakdown {
    #[serde(flatten)]
    pub counts: JobStats,
    pub by_type: BTreeMap<&'static str, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertBreakdown {
    pub total: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub by_type: BTreeMap<&'static str, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStats {
    pub time_range: TimeRange,
    pub since: DateTime<Utc>,
    pub jobs: JobBreakdown,
    pub alerts: AlertBreakdown,
}

/// Buckets jobs (by `created_at`) and alerts (by `timestamp`) inside
/// `[now - range, now]`. No side effects.
pub fn aggregate(jobs: &[Job], alerts: &[Alert], range: TimeRange, now: DateTime<Utc>) -> WorkflowStats {
    let since = now - range.duration();

    let mut jb = JobBreakdown::default();
    for job in jobs.iter().filter(|j| j.created_at >= since) {
        jb.counts.total += 1;
        match job.status {
            JobStatus::Pending => jb.counts.pending += 1,
            JobStatus::Processing => jb.counts.processing += 1,
            JobStatus::Completed => jb.counts.completed += 1,
            JobStatus::Failed => jb.counts.failed += 1,
        }
        *jb.by_type.entry(job.job_type().as_str()).or_default() += 1;
    }

    let mut ab = AlertBreakdown::default();
    for alert in alerts.iter().filter(|a| a.timestamp >= since) {
        ab.total += 1;
        match alert.level {
            AlertLevel::High => ab.high += 1,
            AlertLevel::Medium => ab.medium += 1,
            AlertLevel::Low => ab.low += 1,
        }
        *ab.by_type.entry(alert.alert_type.as_str()).or_default() += 1;
    }

    WorkflowStats {
        time_range: range,
        since,
        jobs: jb,
        alerts: ab,
    }
}

/// Read-side view over the job queue and the alert log.
#[derive(Clone)]
pub struct StatsAggregator {
    queue: Arc<JobQueue>,
    alerts: Arc<dyn AlertRepository>,
}

impl StatsAggregator {
    pub fn new(queue: Arc<JobQueue>, alerts: Arc<dyn AlertRepository>) -> Self {
        Self { queue, alerts }
    }

    pub async fn workflow_stats(&self, range: TimeRange) -> anyhow::Result<WorkflowStats> {
        let now = Utc::now();
        let alerts = self
            .alerts
            .since(now - range.duration())
            .await
            .context("loading alerts")?;
        let jobs = self.queue.get_all_jobs();
        Ok(aggregate(&jobs, &alerts, range, now))
    }
}
