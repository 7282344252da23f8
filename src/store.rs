//! Persistence collaborator: source, feed-item and alert repositories,
//! plus the in-memory implementation used by the binary and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::alerts::Alert;
use crate::ingest::types::{FeedItem, Source, SourceStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait SourceRepository: Send + Sync {
    async fn list_sources(&self) -> StoreResult<Vec<Source>>;
    async fn enabled_sources(&self) -> StoreResult<Vec<Source>>;
    async fn get_source(&self, id: &str) -> StoreResult<Option<Source>>;
    /// Fails with `Conflict` when the id or URL is already registered.
    async fn add_source(&self, source: Source) -> StoreResult<()>;
    /// Sets `active`, bumps `last_collected_at`, adds `saved` to `total_collected`.
    async fn record_success(&self, id: &str, saved: u64, at: DateTime<Utc>) -> StoreResult<()>;
    /// Sets `error`; counters and `last_collected_at` are left alone.
    async fn record_failure(&self, id: &str, error: &str) -> StoreResult<()>;
    /// Adds to `total_collected` without touching status.
    async fn add_collected(&self, id: &str, saved: u64) -> StoreResult<()>;
}

/// Items inserted after a cursor, and the cursor to resume from.
#[derive(Debug, Clone, Default)]
pub struct ItemBatch {
    pub items: Vec<FeedItem>,
    pub cursor: u64,
}

#[async_trait]
pub trait FeedItemRepository: Send + Sync {
    /// Returns `false` (and stores nothing) if the dedup key is already present.
    async fn insert_if_absent(&self, item: FeedItem) -> StoreResult<bool>;
    async fn get_item(&self, dedup_key: &str) -> StoreResult<Option<FeedItem>>;
    /// Insertion-ordered read. Cursor 0 is the start of the store; pass the
    /// returned cursor back to read only what was inserted since.
    async fn items_after(&self, cursor: u64) -> StoreResult<ItemBatch>;
    async fn mark_article_generated(&self, dedup_key: &str) -> StoreResult<()>;
    async fn count_items(&self) -> StoreResult<usize>;
}

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn append(&self, alert: Alert) -> StoreResult<()>;
    /// Newest first.
    async fn recent(&self, limit: usize) -> StoreResult<Vec<Alert>>;
    async fn since(&self, at: DateTime<Utc>) -> StoreResult<Vec<Alert>>;
}

/// Process-local store. Items keep insertion order; alerts are capped.
#[derive(Debug)]
pub struct MemoryStore {
    sources: Mutex<Vec<Source>>,
    items: Mutex<Items>,
    alerts: Mutex<VecDeque<Alert>>,
    alert_cap: usize,
}

#[derive(Debug, Default)]
struct Items {
    by_key: HashMap<String, usize>,
    rows: Vec<FeedItem>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_alert_capacity(10_000)
    }

    pub fn with_alert_capacity(cap: usize) -> Self {
        Self {
            sources: Mutex::new(Vec::new()),
            items: Mutex::new(Items::default()),
            alerts: Mutex::new(VecDeque::new()),
            alert_cap: cap.max(1),
        }
    }

    /// Seed helper for boot and tests; duplicates are ignored.
    pub fn with_sources(self, sources: impl IntoIterator<Item = Source>) -> Self {
        {
            let mut v = lock(&self.sources);
            for s in sources {
                if !v.iter().any(|e| e.id == s.id || e.url == s.url) {
                    v.push(s);
                }
            }
        }
        self
    }

    fn update_source<F>(&self, id: &str, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Source),
    {
        let mut v = lock(&self.sources);
        let src = v
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("source {id}")))?;
        f(src);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceRepository for MemoryStore {
    async fn list_sources(&self) -> StoreResult<Vec<Source>> {
        Ok(lock(&self.sources).clone())
    }

    async fn enabled_sources(&self) -> StoreResult<Vec<Source>> {
        Ok(lock(&self.sources)
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    async fn get_source(&self, id: &str) -> StoreResult<Option<Source>> {
        Ok(lock(&self.sources).iter().find(|s| s.id == id).cloned())
    }

    async fn add_source(&self, source: Source) -> StoreResult<()> {
        let mut v = lock(&self.sources);
        if v.iter().any(|s| s.id == source.id) {
            return Err(StoreError::Conflict(format!("source id {}", source.id)));
        }
        if v.iter().any(|s| s.url == source.url) {
            return Err(StoreError::Conflict(format!("source url {}", source.url)));
        }
        v.push(source);
        Ok(())
    }

    async fn record_success(&self, id: &str, saved: u64, at: DateTime<Utc>) -> StoreResult<()> {
        self.update_source(id, |s| {
            s.status = SourceStatus::Active;
            s.last_collected_at = Some(at);
            s.total_collected = s.total_collected.saturating_add(saved);
            s.last_error = None;
        })
    }

    async fn record_failure(&self, id: &str, error: &str) -> StoreResult<()> {
        self.update_source(id, |s| {
            s.status = SourceStatus::Error;
            s.last_error = Some(error.to_string());
        })
    }

    async fn add_collected(&self, id: &str, saved: u64) -> StoreResult<()> {
        self.update_source(id, |s| {
            s.total_collected = s.total_collected.saturating_add(saved);
        })
    }
}

#[async_trait]
impl FeedItemRepository for MemoryStore {
    async fn insert_if_absent(&self, item: FeedItem) -> StoreResult<bool> {
        let mut items = lock(&self.items);
        if items.by_key.contains_key(&item.dedup_key) {
            return Ok(false);
        }
        let idx = items.rows.len();
        items.by_key.insert(item.dedup_key.clone(), idx);
        items.rows.push(item);
        Ok(true)
    }

    async fn get_item(&self, dedup_key: &str) -> StoreResult<Option<FeedItem>> {
        let items = lock(&self.items);
        Ok(items
            .by_key
            .get(dedup_key)
            .and_then(|&i| items.rows.get(i))
            .cloned())
    }

    async fn items_after(&self, cursor: u64) -> StoreResult<ItemBatch> {
        let items = lock(&self.items);
        let start = usize::try_from(cursor)
            .unwrap_or(usize::MAX)
            .min(items.rows.len());
        Ok(ItemBatch {
            items: items.rows[start..].to_vec(),
            cursor: items.rows.len() as u64,
        })
    }

    async fn mark_article_generated(&self, dedup_key: &str) -> StoreResult<()> {
        let mut items = lock(&self.items);
        let idx = *items
            .by_key
            .get(dedup_key)
            .ok_or_else(|| StoreError::NotFound(format!("feed item {dedup_key}")))?;
        if let Some(row) = items.rows.get_mut(idx) {
            row.has_generated_article = true;
        }
        Ok(())
    }

    async fn count_items(&self) -> StoreResult<usize> {
        Ok(lock(&self.items).rows.len())
    }
}

#[async_trait]
impl AlertRepository for MemoryStore {
    async fn append(&self, alert: Alert) -> StoreResult<()> {
        let mut v = lock(&self.alerts);
        v.push_back(alert);
        while v.len() > self.alert_cap {
            v.pop_front();
        }
        Ok(())
    }

    async fn recent(&self, limit: usize) -> StoreResult<Vec<Alert>> {
        Ok(lock(&self.alerts).iter().rev().take(limit).cloned().collect())
    }

    async fn since(&self, at: DateTime<Utc>) -> StoreResult<Vec<Alert>> {
        Ok(lock(&self.alerts)
            .iter()
            .filter(|a| a.timestamp >= at)
            .cloned()
            .collect())
    }
}
