// src/jobs/types.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    GenerateArticle,
    FactCheck,
    PublishArticle,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::GenerateArticle => "generate_article",
            JobType::FactCheck => "fact_check",
            JobType::PublishArticle => "publish_article",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleType {
    #[default]
    Analysis,
    Breaking,
    Summary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleDepth {
    Brief,
    #[default]
    Standard,
    Comprehensive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateArticle {
    /// Dedup key of the feed item the article is written about.
    pub item_key: String,
    #[serde(default)]
    pub article_type: ArticleType,
    #[serde(default)]
    pub depth: ArticleDepth,
    #[serde(default)]
    pub publish: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactCheck {
    pub article_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishArticle {
    pub article_id: String,
}

/// Job payload, one shape per job type. On the wire: `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum JobPayload {
    GenerateArticle(GenerateArticle),
    FactCheck(FactCheck),
    PublishArticle(PublishArticle),
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::GenerateArticle(_) => JobType::GenerateArticle,
            JobPayload::FactCheck(_) => JobType::FactCheck,
            JobPayload::PublishArticle(_) => JobType::PublishArticle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Pending → Processing → {Completed | Failed}; nothing else.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid job transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    /// Serialized inline as `type` + `payload`.
    #[serde(flatten)]
    pub payload: JobPayload,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl Job {
    pub fn new(payload: JobPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
            completed_at: None,
            error: None,
            result: None,
        }
    }

    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Processing)?;
        self.processed_at = Some(at);
        Ok(())
    }

    pub fn complete(
        &mut self,
        result: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(result);
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(at);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}
