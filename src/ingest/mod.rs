// src/ingest/mod.rs
pub mod feed;
pub mod fetch;
pub mod scoring;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::IngestConfig;
use crate::ingest::feed::FeedEntry;
use crate::ingest::types::{
    CollectionSummary, FeedFetcher, FeedItem, SaveOutcome, Source, SourceCollection, SourceError,
};
use crate::scheduler::Cycle;
use crate::sentiment::SentimentAnalyzer;
use crate::store::{FeedItemRepository, SourceRepository, StoreError};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_items_found_total", "Entries parsed from feeds.");
        describe_counter!("ingest_items_saved_total", "New items persisted.");
        describe_counter!(
            "ingest_dedup_total",
            "Items skipped because their dedup key was already stored."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Per-source fetch/parse/save failures."
        );
        describe_histogram!("ingest_fetch_ms", "Feed fetch time in milliseconds.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when collect-all last finished."
        );
    });
}

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("source {0} not found")]
    NotFound(String),
    #[error("source {0} is disabled")]
    Disabled(String),
    #[error("{0:#}")]
    Fetch(anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Store failure partway through a batch; `partial` counts what was written first.
#[derive(Debug, thiserror::Error)]
#[error("{source} after saving {} items", partial.saved)]
pub struct SaveError {
    pub partial: SaveOutcome,
    pub source: StoreError,
}

/// Normalize text: decode entities, strip tags, collapse whitespace, cap length.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags =
        RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("static regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("static regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap, marked with an ellipsis
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect::<String>().trim_end().to_string();
        out.push_str("...");
    }

    out
}

/// Hex SHA-256 of the trimmed canonical identifier.
pub fn dedup_key(identifier: &str) -> String {
    format!("{:x}", Sha256::digest(identifier.trim().as_bytes()))
}

/// GUID first, then link, then (last resort) the lower-cased title.
pub fn canonical_identifier(entry: &FeedEntry, title: &str) -> Option<String> {
    let non_empty = |s: &Option<String>| {
        s.as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    };
    non_empty(&entry.guid)
        .or_else(|| non_empty(&entry.link))
        .or_else(|| (!title.is_empty()).then(|| title.to_lowercase()))
}

/// Hard cap on stored body text.
const CONTENT_MAX_CHARS: usize = 5_000;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
    pub max_entries_per_feed: usize,
    pub summary_max_chars: usize,
    pub keywords: Vec<String>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for IngestOptions {
    fn from(c: &IngestConfig) -> Self {
        Self {
            fetch_timeout: Duration::from_secs(c.fetch_timeout_secs),
            max_concurrent_fetches: c.max_concurrent_fetches.max(1),
            max_entries_per_feed: c.max_entries_per_feed,
            summary_max_chars: c.summary_max_chars,
            keywords: c.keywords.clone(),
        }
    }
}

/// Fetch → parse → dedup → persist → update source health.
/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct FeedIngestionPipeline {
    sources: Arc<dyn SourceRepository>,
    items: Arc<dyn FeedItemRepository>,
    fetcher: Arc<dyn FeedFetcher>,
    fetch_limit: Arc<Semaphore>,
    opts: Arc<IngestOptions>,
    analyzer: SentimentAnalyzer,
}

impl FeedIngestionPipeline {
    pub fn new(
        sources: Arc<dyn SourceRepository>,
        items: Arc<dyn FeedItemRepository>,
        fetcher: Arc<dyn FeedFetcher>,
        opts: IngestOptions,
    ) -> Self {
        ensure_metrics_described();
        Self {
            sources,
            items,
            fetcher,
            fetch_limit: Arc::new(Semaphore::new(opts.max_concurrent_fetches.max(1))),
            opts: Arc::new(opts),
            analyzer: SentimentAnalyzer::new(),
        }
    }

    /// Collect every enabled source. Per-source failures land in `source_errors`;
    /// only a failure to enumerate sources fails the whole pass.
    pub async fn collect_from_all_sources(&self) -> anyhow::Result<CollectionSummary> {
        let sources = self
            .sources
            .enabled_sources()
            .await
            .context("listing enabled sources")?;

        let mut summary = CollectionSummary {
            sources_processed: sources.len(),
            ..Default::default()
        };

        let mut set = JoinSet::new();
        let mut task_sources = HashMap::new();
        for source in sources {
            let this = self.clone();
            let id = source.id.clone();
            let handle = set.spawn(async move { this.collect_one(&source).await });
            task_sources.insert(handle.id(), id);
        }

        while let Some(joined) = set.join_next_with_id().await {
            let (task_id, result) = match joined {
                Ok((task_id, r)) => (task_id, r.map_err(|e| e.to_string())),
                Err(e) => {
                    let error = format!("collection task failed: {e}");
                    if let Some(id) = task_sources.get(&e.id()) {
                        self.note_failure(id, &error).await;
                    }
                    (e.id(), Err(error))
                }
            };
            let source_id = task_sources.remove(&task_id).unwrap_or_default();
            match result {
                Ok(c) => {
                    summary.items_found += c.items_found;
                    summary.items_saved += c.items_saved;
                }
                Err(error) => summary.source_errors.push(SourceError { source_id, error }),
            }
        }
        summary.source_errors.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        gauge!("ingest_pipeline_last_run_ts").set(Utc::now().timestamp() as f64);
        tracing::info!(
            target: "ingest",
            sources = summary.sources_processed,
            found = summary.items_found,
            saved = summary.items_saved,
            errors = summary.source_errors.len(),
            "collect-all finished"
        );
        Ok(summary)
    }

    /// On-demand collection of one source, same rules as the scheduled pass.
    pub async fn collect_source(&self, source_id: &str) -> Result<SourceCollection, CollectError> {
        let source = self.collectable_source(source_id).await?;
        self.collect_one(&source).await
    }

    /// Lookup + enabled check without collecting; used by handlers before spawning.
    pub async fn collectable_source(&self, source_id: &str) -> Result<Source, CollectError> {
        let source = self
            .sources
            .get_source(source_id)
            .await?
            .ok_or_else(|| CollectError::NotFound(source_id.to_string()))?;
        if !source.enabled {
            return Err(CollectError::Disabled(source_id.to_string()));
        }
        Ok(source)
    }

    async fn collect_one(&self, source: &Source) -> Result<SourceCollection, CollectError> {
        match self.fetch_and_save(source).await {
            Ok((found, saved)) => {
                tracing::info!(
                    target: "ingest",
                    source_id = %source.id,
                    found,
                    saved = saved.saved,
                    duplicates = saved.duplicates,
                    "source collected"
                );
                Ok(SourceCollection {
                    items_found: found,
                    items_saved: saved.saved,
                })
            }
            Err(e) => {
                self.note_failure(&source.id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn fetch_and_save(&self, source: &Source) -> Result<(usize, SaveOutcome), CollectError> {
        let items = self
            .fetch_and_parse_feed(&source.url, &source.name)
            .await
            .map_err(CollectError::Fetch)?;
        let found = items.len();
        let saved = match self.save_news_items(items).await {
            Ok(saved) => saved,
            Err(e) => {
                if e.partial.saved > 0 {
                    if let Err(se) = self
                        .sources
                        .add_collected(&source.id, e.partial.saved as u64)
                        .await
                    {
                        tracing::error!(target: "ingest", source_id = %source.id, error = %se, "could not credit partially saved items");
                    }
                }
                return Err(CollectError::Store(e.source));
            }
        };
        self.sources
            .record_success(&source.id, saved.saved as u64, Utc::now())
            .await?;
        Ok((found, saved))
    }

    /// Counts the failure and marks the source as errored.
    async fn note_failure(&self, source_id: &str, error: &str) {
        counter!("ingest_source_errors_total").increment(1);
        tracing::warn!(target: "ingest", source_id, error, "source collection failed");
        if let Err(se) = self.sources.record_failure(source_id, error).await {
            tracing::error!(target: "ingest", source_id, error = %se, "could not record source failure");
        }
    }

    /// Fetch one feed URL (bounded by the fetch semaphore and timeout) and build candidate items.
    pub async fn fetch_and_parse_feed(
        &self,
        url: &str,
        source_name: &str,
    ) -> anyhow::Result<Vec<FeedItem>> {
        let body = {
            let _permit = self
                .fetch_limit
                .acquire()
                .await
                .context("fetch limiter closed")?;
            let fetcher = self.fetcher.name();
            tracing::debug!(target: "ingest", fetcher, url, "fetching feed");
            let t0 = std::time::Instant::now();
            let body = tokio::time::timeout(self.opts.fetch_timeout, self.fetcher.fetch(url))
                .await
                .map_err(|_| {
                    anyhow!(
                        "fetch of {url} timed out after {}s",
                        self.opts.fetch_timeout.as_secs_f32()
                    )
                })??;
            histogram!("ingest_fetch_ms", "fetcher" => fetcher)
                .record(t0.elapsed().as_secs_f64() * 1_000.0);
            body
        };

        let entries = feed::parse_feed(&body).with_context(|| format!("parsing feed {url}"))?;
        counter!("ingest_items_found_total").increment(entries.len() as u64);

        let now = Utc::now();
        Ok(entries
            .into_iter()
            .take(self.opts.max_entries_per_feed)
            .filter_map(|e| self.build_item(e, source_name, now))
            .collect())
    }

    /// Persist items whose dedup key is new; known keys are skipped silently.
    /// A store failure stops the batch and reports what was already written.
    pub async fn save_news_items(&self, items: Vec<FeedItem>) -> Result<SaveOutcome, SaveError> {
        let mut out = SaveOutcome::default();
        let mut failure = None;
        for item in items {
            match self.items.insert_if_absent(item).await {
                Ok(true) => out.saved += 1,
                Ok(false) => out.duplicates += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        counter!("ingest_items_saved_total").increment(out.saved as u64);
        counter!("ingest_dedup_total").increment(out.duplicates as u64);
        match failure {
            None => Ok(out),
            Some(source) => Err(SaveError {
                partial: out,
                source,
            }),
        }
    }

    fn build_item(&self, entry: FeedEntry, source: &str, now: DateTime<Utc>) -> Option<FeedItem> {
        let title = normalize_text(entry.title.as_deref().unwrap_or_default(), 300);
        let summary = normalize_text(
            entry.summary.as_deref().unwrap_or_default(),
            self.opts.summary_max_chars,
        );
        if title.is_empty() && summary.is_empty() {
            return None;
        }

        let headline = format!("{title} {summary}");
        if !scoring::is_relevant(&headline, &self.opts.keywords) {
            tracing::debug!(target: "ingest", title = %title, "filtered by keywords");
            return None;
        }

        let identifier = canonical_identifier(&entry, &title)?;

        let content = match entry.content.as_deref().or(entry.summary.as_deref()) {
            Some(raw) => normalize_text(raw, CONTENT_MAX_CHARS),
            None => String::new(),
        };

        Some(FeedItem {
            dedup_key: dedup_key(&identifier),
            importance: scoring::importance(&headline),
            sentiment: self.analyzer.polarity(&headline),
            coins: scoring::extract_coins(&headline),
            url: entry.link.unwrap_or_default(),
            source: source.to_string(),
            published_at: entry.published_at.unwrap_or(now),
            has_generated_article: false,
            collected_at: now,
            title,
            summary,
            content,
        })
    }
}

#[async_trait]
impl Cycle for FeedIngestionPipeline {
    type Output = CollectionSummary;

    fn name(&self) -> &'static str {
        "collection"
    }

    async fn run_cycle(&self) -> anyhow::Result<CollectionSummary> {
        self.collect_from_all_sources().await
    }
}
