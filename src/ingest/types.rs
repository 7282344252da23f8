// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stored news entry. `dedup_key` is unique across the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub dedup_key: String,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub url: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub importance: i32, // 0..=100
    pub sentiment: f32,  // -1.0..=1.0
    pub has_generated_article: bool,
    pub coins: Vec<String>, // e.g. ["BTC", "ETH"]
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Inactive,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub status: SourceStatus,
    pub last_collected_at: Option<DateTime<Utc>>,
    pub total_collected: u64,
    pub last_error: Option<String>,
}

impl Source {
    /// A freshly registered source that has never been collected.
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            enabled: true,
            status: SourceStatus::Inactive,
            last_collected_at: None,
            total_collected: 0,
            last_error: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceError {
    pub source_id: String,
    pub error: String,
}

/// Aggregate result of one `collect_from_all_sources` pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub sources_processed: usize,
    pub items_found: usize,
    pub items_saved: usize,
    pub source_errors: Vec<SourceError>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub saved: usize,
    pub duplicates: usize,
}

/// Per-source result of a successful collection.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceCollection {
    pub items_found: usize,
    pub items_saved: usize,
}

/// Network side of ingestion: returns the raw feed body for a URL.
#[async_trait::async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
    fn name(&self) -> &'static str;
}
