// src/ingest/fetch.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::ingest::types::FeedFetcher;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; newsflow/0.1; +feed-collector)";

/// Plain HTTP GET fetcher. Non-2xx responses are errors.
#[derive(Clone)]
pub struct HttpFeedFetcher {
    client: reqwest::Client,
}

impl HttpFeedFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .build()
            .context("building feed http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let resp = resp
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        resp.text().await.context("reading feed body")
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
