//! Alert generation: market monitors produce signals, the alert cycle grades
//! them by magnitude and appends them to the alert log.

pub mod coingecko;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::scheduler::Cycle;
use crate::store::{AlertRepository, FeedItemRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    PriceSurge,
    PriceDrop,
    VolumeSpike,
    NewsSentiment,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::PriceSurge => "price_surge",
            AlertType::PriceDrop => "price_drop",
            AlertType::VolumeSpike => "volume_spike",
            AlertType::NewsSentiment => "news_sentiment",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    High,
    Medium,
    Low,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::High => "high",
            AlertLevel::Medium => "medium",
            AlertLevel::Low => "low",
        }
    }
}

/// Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub symbol: String,
    pub alert_type: AlertType,
    pub level: AlertLevel,
    pub title: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        symbol: impl Into<String>,
        alert_type: AlertType,
        level: AlertLevel,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            alert_type,
            level,
            title: title.into(),
            description: description.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Raw observation from a monitor; `magnitude` is signed (percent-like).
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSignal {
    pub symbol: String,
    pub alert_type: AlertType,
    pub magnitude: f64,
    pub title: String,
    pub description: String,
}

#[async_trait]
pub trait MarketMonitor: Send + Sync {
    async fn scan(&self) -> anyhow::Result<Vec<MarketSignal>>;
}

/// |m| >= 10 → high, >= 5 → medium, else low.
pub fn classify(magnitude: f64) -> AlertLevel {
    let m = magnitude.abs();
    if m >= 10.0 {
        AlertLevel::High
    } else if m >= 5.0 {
        AlertLevel::Medium
    } else {
        AlertLevel::Low
    }
}

/// Turns freshly collected news into per-coin sentiment signals.
pub struct NewsSignalMonitor {
    items: Arc<dyn FeedItemRepository>,
    /// Store cursor past the last item scanned.
    cursor: AtomicU64,
}

impl NewsSignalMonitor {
    pub fn new(items: Arc<dyn FeedItemRepository>) -> Self {
        Self {
            items,
            cursor: AtomicU64::new(0),
        }
    }
}

#[derive(Default)]
struct CoinTally {
    stories: usize,
    importance: i64,
    sentiment: f64,
}

#[async_trait]
impl MarketMonitor for NewsSignalMonitor {
    async fn scan(&self) -> anyhow::Result<Vec<MarketSignal>> {
        let batch = self
            .items
            .items_after(self.cursor.load(Ordering::SeqCst))
            .await
            .context("reading recent feed items")?;
        let fresh = batch.items;

        let mut by_coin: BTreeMap<&str, CoinTally> = BTreeMap::new();
        for item in &fresh {
            for coin in &item.coins {
                let t = by_coin.entry(coin.as_str()).or_default();
                t.stories += 1;
                t.importance += i64::from(item.importance);
                t.sentiment += f64::from(item.sentiment);
            }
        }

        let signals = by_coin
            .into_iter()
            .map(|(coin, t)| {
                let mean = t.sentiment / t.stories as f64;
                let sign = if mean < 0.0 { -1.0 } else { 1.0 };
                let mood = if mean > 0.1 {
                    "bullish"
                } else if mean < -0.1 {
                    "bearish"
                } else {
                    "mixed"
                };
                MarketSignal {
                    symbol: coin.to_string(),
                    alert_type: AlertType::NewsSentiment,
                    magnitude: sign * t.importance as f64 / 20.0,
                    title: format!("{coin} news flow {mood}"),
                    description: format!(
                        "{} new stories, mean sentiment {mean:+.2}",
                        t.stories
                    ),
                }
            })
            .collect();

        self.cursor.fetch_max(batch.cursor, Ordering::SeqCst);
        Ok(signals)
    }
}

/// Runs several monitors as one. A failing monitor is logged and skipped;
/// the scan fails only when every monitor fails.
pub struct CompositeMonitor {
    monitors: Vec<(&'static str, Arc<dyn MarketMonitor>)>,
}

impl CompositeMonitor {
    pub fn new() -> Self {
        Self {
            monitors: Vec::new(),
        }
    }

    pub fn with(mut self, name: &'static str, monitor: Arc<dyn MarketMonitor>) -> Self {
        self.monitors.push((name, monitor));
        self
    }
}

impl Default for CompositeMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketMonitor for CompositeMonitor {
    async fn scan(&self) -> anyhow::Result<Vec<MarketSignal>> {
        let mut signals = Vec::new();
        let mut first_error = None;
        let mut failures = 0;
        for (name, monitor) in &self.monitors {
            match monitor.scan().await {
                Ok(found) => signals.extend(found),
                Err(e) => {
                    failures += 1;
                    let error = format!("{e:#}");
                    tracing::warn!(target: "alerts", monitor = *name, error, "monitor scan failed");
                    first_error.get_or_insert(e.context(format!("{name} monitor")));
                }
            }
        }
        match first_error {
            Some(e) if failures == self.monitors.len() => Err(e),
            _ => Ok(signals),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertCycleSummary {
    pub generated: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

pub struct AlertGenerationCycle {
    monitor: Arc<dyn MarketMonitor>,
    alerts: Arc<dyn AlertRepository>,
}

impl AlertGenerationCycle {
    pub fn new(monitor: Arc<dyn MarketMonitor>, alerts: Arc<dyn AlertRepository>) -> Self {
        static ONCE: OnceCell<()> = OnceCell::new();
        ONCE.get_or_init(|| {
            describe_counter!("alerts_generated_total", "Alerts appended, by level.");
        });
        Self { monitor, alerts }
    }

    pub async fn generate(&self) -> anyhow::Result<AlertCycleSummary> {
        let signals = self.monitor.scan().await.context("market scan")?;
        let mut summary = AlertCycleSummary::default();
        for s in signals {
            let level = classify(s.magnitude);
            self.alerts
                .append(Alert::new(s.symbol, s.alert_type, level, s.title, s.description))
                .await
                .context("appending alert")?;
            counter!("alerts_generated_total", "level" => level.as_str()).increment(1);
            summary.generated += 1;
            match level {
                AlertLevel::High => summary.high += 1,
                AlertLevel::Medium => summary.medium += 1,
                AlertLevel::Low => summary.low += 1,
            }
        }
        tracing::info!(
            target: "alerts",
            generated = summary.generated,
            high = summary.high,
            "alert generation finished"
        );
        Ok(summary)
    }
}

#[async_trait]
impl Cycle for AlertGenerationCycle {
    type Output = AlertCycleSummary;

    fn name(&self) -> &'static str {
        "alerts"
    }

    async fn run_cycle(&self) -> anyhow::Result<AlertCycleSummary> {
        self.generate().await
    }
}
