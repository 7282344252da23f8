//! Fact extraction and plausibility checks over article text.
//!
//! Extraction is regex-driven: prices, percentages, dates, relative time
//! periods, market caps, rankings and coin names quoted near price talk.
//! Only dates and percentages are verified; other facts are reported as
//! skipped so an editor can check them by hand.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};

use crate::jobs::types::{JobPayload, JobType};
use crate::jobs::{JobProcessor, JobQueue};
use crate::store::FeedItemRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Price,
    Percentage,
    Date,
    TimePeriod,
    MarketCap,
    Ranking,
    CryptoName,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fact {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: FactKind,
    /// Surrounding text, for the reviewer.
    pub context: String,
    /// Byte offset in the checked text.
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactVerdict {
    #[serde(flatten)]
    pub fact: Fact,
    /// `None` means the fact was not checked.
    pub verified: Option<bool>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactCheckReport {
    pub total_facts: usize,
    pub verified: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Share of extracted facts that verified, 0..=100. 100 when nothing was extracted.
    pub reliability_score: f64,
    pub items: Vec<FactVerdict>,
}

const CONTEXT_PAD: usize = 50;
const NAME_CONTEXT_PAD: usize = 100;
const MAX_DATE_AGE_DAYS: i64 = 5 * 365;

static PATTERNS: Lazy<Vec<(FactKind, Regex)>> = Lazy::new(|| {
    let p = |kind, re: &str| (kind, Regex::new(re).expect("static regex"));
    vec![
        p(
            FactKind::Price,
            r"(?i)\$\s?\d+(?:,\d{3})*(?:\.\d+)?(?:\s?(?:k|m|bn|million|billion|trillion)\b)?",
        ),
        p(FactKind::Percentage, r"(?i)[+-]?\d+(?:\.\d+)?\s?(?:%|percent\b)"),
        p(
            FactKind::Date,
            r"(?i)\b\d{4}-\d{2}-\d{2}\b|\b\d{4}/\d{1,2}/\d{1,2}\b|\b(?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.? \d{1,2},? \d{4}\b",
        ),
        p(
            FactKind::TimePeriod,
            r"(?i)\b\d+[\s-]?(?:hour|day|week|month|year)s?\s+(?:ago|later|earlier)\b|\b(?:within|in the (?:last|past)|over the (?:last|past))\s+\d+\s+(?:hour|day|week|month|year)s?\b",
        ),
        p(
            FactKind::MarketCap,
            r"(?i)market cap(?:italization)?[^.$\d]{0,40}\$?\d+(?:[,.]\d+)*\s?(?:million|billion|trillion|[mbt]n?)?\b",
        ),
        p(
            FactKind::Ranking,
            r"(?i)\b(?:no\.\s?|number\s)\d+\b|\btop\s\d+\b|\branked\s\d+(?:st|nd|rd|th)?\b|#\d+\b",
        ),
    ]
});

static COIN_NAMES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:bitcoin|ethereum|ripple|xrp|cardano|solana|polkadot|chainlink|polygon|avalanche)\b",
    )
    .expect("static regex")
});

static PRICE_TALK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:price[sd]?|trad(?:e|ed|ing)|valued?|worth)\b").expect("static regex")
});

static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[+-]?\d+(?:\.\d+)?").expect("static regex"));

/// Slice of `text` around `start..end`, widened to char boundaries.
fn window(text: &str, start: usize, end: usize, pad: usize) -> &str {
    let mut lo = start.saturating_sub(pad);
    while !text.is_char_boundary(lo) {
        lo -= 1;
    }
    let mut hi = end.saturating_add(pad).min(text.len());
    while !text.is_char_boundary(hi) {
        hi += 1;
    }
    text[lo..hi].trim()
}

/// All checkable facts in `text`, ordered by position. A given text of a
/// given kind is reported once.
pub fn extract_facts(text: &str) -> Vec<Fact> {
    let mut facts = Vec::new();
    for (kind, re) in PATTERNS.iter() {
        for m in re.find_iter(text) {
            facts.push(Fact {
                text: m.as_str().trim().to_string(),
                kind: *kind,
                context: window(text, m.start(), m.end(), CONTEXT_PAD).to_string(),
                position: m.start(),
            });
        }
    }
    for m in COIN_NAMES.find_iter(text) {
        let around = window(text, m.start(), m.end(), NAME_CONTEXT_PAD);
        if PRICE_TALK.is_match(around) {
            facts.push(Fact {
                text: m.as_str().to_string(),
                kind: FactKind::CryptoName,
                context: around.to_string(),
                position: m.start(),
            });
        }
    }

    facts.sort_by_key(|f| f.position);
    let mut seen = HashSet::new();
    facts.retain(|f| seen.insert((f.text.to_lowercase(), f.kind)));
    facts
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let cleaned = raw.replace(['.', ','], "");
    ["%Y-%m-%d", "%Y/%m/%d", "%B %d %Y", "%b %d %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
}

/// Future dates fail. Dates more than five years back fail unless they are
/// Bitcoin-era history.
pub fn verify_date(raw: &str, context: &str, today: NaiveDate) -> (Option<bool>, Option<String>) {
    let Some(date) = parse_date(raw) else {
        return (Some(false), Some("could not parse date".into()));
    };
    if date > today {
        return (Some(false), Some("date is in the future".into()));
    }
    if date < today - Duration::days(MAX_DATE_AGE_DAYS) {
        if date.year() >= 2009 && context.to_lowercase().contains("bitcoin") {
            return (Some(true), Some("historical bitcoin date".into()));
        }
        return (Some(false), Some("date looks too old".into()));
    }
    (Some(true), None)
}

fn verify_percentage(raw: &str) -> (Option<bool>, Option<String>) {
    let Some(value) = NUMBER
        .find(raw)
        .and_then(|m| m.as_str().parse::<f64>().ok())
    else {
        return (None, None);
    };
    if value > 1_000.0 {
        (Some(false), Some("implausibly high percentage".into()))
    } else if value < -90.0 {
        (Some(false), Some("implausibly low percentage".into()))
    } else {
        (Some(true), None)
    }
}

pub fn check_article(text: &str, today: NaiveDate) -> FactCheckReport {
    let items: Vec<FactVerdict> = extract_facts(text)
        .into_iter()
        .map(|fact| {
            let (verified, message) = match fact.kind {
                FactKind::Date => verify_date(&fact.text, &fact.context, today),
                FactKind::Percentage => verify_percentage(&fact.text),
                _ => (None, None),
            };
            FactVerdict {
                fact,
                verified,
                message,
            }
        })
        .collect();

    let verified = items.iter().filter(|v| v.verified == Some(true)).count();
    let failed = items.iter().filter(|v| v.verified == Some(false)).count();
    let total = items.len();
    FactCheckReport {
        total_facts: total,
        verified,
        failed,
        skipped: total - verified - failed,
        reliability_score: if total == 0 {
            100.0
        } else {
            verified as f64 / total as f64 * 100.0
        },
        items,
    }
}

/// Checks a stored feed item, or the draft produced by a completed
/// `generate_article` job, addressed by `article_id`.
pub struct FactCheckProcessor {
    items: Arc<dyn FeedItemRepository>,
    drafts: Weak<JobQueue>,
}

impl FactCheckProcessor {
    pub fn new(items: Arc<dyn FeedItemRepository>, drafts: Weak<JobQueue>) -> Self {
        Self { items, drafts }
    }

    async fn article_text(&self, article_id: &str) -> anyhow::Result<String> {
        if let Some(item) = self
            .items
            .get_item(article_id)
            .await
            .context("loading feed item")?
        {
            let body = if item.content.is_empty() {
                item.summary
            } else {
                item.content
            };
            return Ok(format!("{}\n{}", item.title, body));
        }

        let draft = self
            .drafts
            .upgrade()
            .and_then(|q| q.get_job(article_id))
            .filter(|job| job.job_type() == JobType::GenerateArticle)
            .and_then(|job| job.result);
        match draft {
            Some(d) => Ok(["title", "lead", "body"]
                .iter()
                .filter_map(|k| d.get(*k).and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")),
            None => bail!("no feed item or article draft {article_id}"),
        }
    }
}

#[async_trait]
impl JobProcessor for FactCheckProcessor {
    async fn process(&self, payload: &JobPayload) -> anyhow::Result<Value> {
        let JobPayload::FactCheck(req) = payload else {
            bail!("fact checks cannot handle {} jobs", payload.job_type());
        };
        let text = self.article_text(&req.article_id).await?;
        let report = check_article(&text, Utc::now().date_naive());
        tracing::info!(
            target: "jobs",
            article = %req.article_id,
            facts = report.total_facts,
            failed = report.failed,
            "fact check finished"
        );

        let mut out = serde_json::to_value(&report).context("encoding fact-check report")?;
        out["articleId"] = json!(req.article_id);
        Ok(out)
    }
}
