// tests/common/mod.rs
//
// Shared fakes for integration tests: a scripted feed fetcher and small
// builders. Each test binary only uses part of this module.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use newsflow::config::AppConfig;
use newsflow::ingest::types::{FeedFetcher, Source};
use newsflow::ingest::{FeedIngestionPipeline, IngestOptions};
use newsflow::store::MemoryStore;

pub const RSS: &str = include_str!("../fixtures/coin_wire_rss.xml");
pub const ATOM: &str = include_str!("../fixtures/chain_daily_atom.xml");

#[derive(Clone)]
pub enum Reply {
    Body(String),
    Fail(String),
    /// Never answers; only a timeout gets the caller out.
    Hang,
    /// Panics inside the fetch, taking the collection task down with it.
    Panic,
}

/// Scripted fetcher: one reply per URL, optional latency, call accounting.
#[derive(Default)]
pub struct MockFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<String>>,
    latency: Option<Duration>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn reply(self, url: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(url.to_string(), reply);
        self
    }

    pub fn set_reply(&self, url: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .insert(url.to_string(), reply);
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of fetches observed in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
        let reply = self.replies.lock().unwrap().get(url).cloned();
        let out = match reply {
            Some(Reply::Body(b)) => Ok(b),
            Some(Reply::Fail(e)) => Err(anyhow!(e)),
            Some(Reply::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Some(Reply::Panic) => panic!("fetcher exploded on {url}"),
            None => Err(anyhow!("404 for {url}")),
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        out
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

pub fn source(id: &str, url: &str) -> Source {
    Source::new(id, id.to_uppercase(), url)
}

pub fn pipeline(
    store: &Arc<MemoryStore>,
    fetcher: &Arc<MockFetcher>,
    opts: IngestOptions,
) -> FeedIngestionPipeline {
    FeedIngestionPipeline::new(store.clone(), store.clone(), fetcher.clone(), opts)
}

/// Config with no seeded sources and short timeouts, for router-level tests.
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.sources.clear();
    cfg.ingest.fetch_timeout_secs = 2;
    cfg.jobs.processor_timeout_secs = 2;
    cfg
}
