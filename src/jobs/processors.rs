// src/jobs/processors.rs
use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::jobs::fact_check::FactCheckProcessor;
use crate::jobs::types::{ArticleDepth, ArticleType, GenerateArticle, JobPayload, JobType};
use crate::jobs::{JobProcessor, JobQueue};
use crate::store::FeedItemRepository;

/// Adapts an async closure into a [`JobProcessor`].
pub struct FnProcessor<F>(F);

#[async_trait]
impl<F, Fut> JobProcessor for FnProcessor<F>
where
    F: Fn(JobPayload) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn process(&self, payload: &JobPayload) -> anyhow::Result<Value> {
        (self.0)(payload.clone()).await
    }
}

pub fn processor_fn<F, Fut>(f: F) -> Arc<dyn JobProcessor>
where
    F: Fn(JobPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnProcessor(f))
}

/// Builds an article draft from a stored feed item and flags the item so it
/// is not picked for generation again.
pub struct ArticleDraftProcessor {
    items: Arc<dyn FeedItemRepository>,
}

impl ArticleDraftProcessor {
    pub fn new(items: Arc<dyn FeedItemRepository>) -> Self {
        Self { items }
    }

    fn word_target(depth: ArticleDepth) -> usize {
        match depth {
            ArticleDepth::Brief => 300,
            ArticleDepth::Standard => 800,
            ArticleDepth::Comprehensive => 1_500,
        }
    }

    fn outline(kind: ArticleType, depth: ArticleDepth) -> Vec<&'static str> {
        let mut sections = match kind {
            ArticleType::Breaking => vec!["What happened", "Why it matters"],
            ArticleType::Summary => vec!["Key points"],
            ArticleType::Analysis => vec!["Background", "Market impact", "Outlook"],
        };
        match depth {
            ArticleDepth::Brief => sections.truncate(1),
            ArticleDepth::Standard => {}
            ArticleDepth::Comprehensive => sections.extend(["Related coins", "Sources"]),
        }
        sections
    }

    async fn draft(&self, req: &GenerateArticle) -> anyhow::Result<Value> {
        let item = self
            .items
            .get_item(&req.item_key)
            .await
            .context("loading feed item")?
            .with_context(|| format!("feed item {} not found", req.item_key))?;

        let headline = match req.article_type {
            ArticleType::Breaking => format!("BREAKING: {}", item.title),
            ArticleType::Summary => format!("In brief: {}", item.title),
            ArticleType::Analysis => format!("Analysis: {}", item.title),
        };
        let body = if item.content.is_empty() {
            item.summary.clone()
        } else {
            item.content.clone()
        };

        self.items
            .mark_article_generated(&item.dedup_key)
            .await
            .context("flagging feed item")?;

        tracing::info!(
            target: "jobs",
            item = %item.dedup_key,
            source = %item.source,
            "article draft generated"
        );

        Ok(json!({
            "itemKey": item.dedup_key,
            "title": headline,
            "lead": item.summary,
            "outline": Self::outline(req.article_type, req.depth),
            "body": body,
            "sourceUrl": item.url,
            "coins": item.coins,
            "articleType": req.article_type,
            "depth": req.depth,
            "targetWords": Self::word_target(req.depth),
            "publish": req.publish,
            "generatedAt": Utc::now(),
        }))
    }
}

#[async_trait]
impl JobProcessor for ArticleDraftProcessor {
    async fn process(&self, payload: &JobPayload) -> anyhow::Result<Value> {
        match payload {
            JobPayload::GenerateArticle(req) => self.draft(req).await,
            other => bail!("article drafts cannot handle {} jobs", other.job_type()),
        }
    }
}

/// Wires the processors the binary ships with. Publish has no built-in
/// handler; those jobs fail with "no processor registered" until one is added.
pub fn register_default_processors(queue: &Arc<JobQueue>, items: Arc<dyn FeedItemRepository>) {
    queue.register_processor(
        JobType::GenerateArticle,
        Arc::new(ArticleDraftProcessor::new(items.clone())),
    );
    queue.register_processor(
        JobType::FactCheck,
        Arc::new(FactCheckProcessor::new(items, Arc::downgrade(queue))),
    );
}
