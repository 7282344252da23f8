// src/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::ingest::fetch::DEFAULT_USER_AGENT;
use crate::ingest::types::Source;

const ENV_PATH: &str = "NEWSFLOW_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub interval_secs: u64,
    pub autostart: bool,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 900,
            autostart: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub interval_secs: u64,
    pub autostart: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            autostart: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub fetch_timeout_secs: u64,
    pub max_concurrent_fetches: usize,
    pub max_entries_per_feed: usize,
    pub summary_max_chars: usize,
    pub user_agent: String,
    /// Relevance filter over title + summary; empty accepts everything.
    pub keywords: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 30,
            max_concurrent_fetches: 4,
            max_entries_per_feed: 20,
            summary_max_chars: 500,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            keywords: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub processor_timeout_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            processor_timeout_secs: 300,
        }
    }
}

/// CoinGecko market data behind price and volume alerts. Off by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: Option<String>,
    pub vs_currency: String,
    /// Coins by market cap; CoinGecko caps a page at 250.
    pub limit: usize,
    pub timeout_secs: u64,
    /// Smallest absolute 24h move, in percent, that raises a price alert.
    pub min_price_change_pct: f64,
    /// 24h volume over market cap at which a volume alert starts.
    pub volume_spike_ratio: f64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            api_key: None,
            vs_currency: "usd".to_string(),
            limit: 50,
            timeout_secs: 15,
            min_price_change_pct: 3.0,
            volume_spike_ratio: 0.25,
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl SourceConfig {
    fn feed(id: &str, name: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            enabled: true,
        }
    }

    pub fn to_source(&self) -> Source {
        let s = Source::new(&self.id, &self.name, &self.url);
        if self.enabled {
            s
        } else {
            s.disabled()
        }
    }
}

pub fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::feed("cointelegraph", "Cointelegraph", "https://cointelegraph.com/rss"),
        SourceConfig::feed(
            "coindesk",
            "CoinDesk",
            "https://www.coindesk.com/arc/outboundfeeds/rss/",
        ),
        SourceConfig::feed(
            "bitcoinmagazine",
            "Bitcoin Magazine",
            "https://bitcoinmagazine.com/.rss/full/",
        ),
        SourceConfig::feed("cryptonews", "CryptoNews", "https://cryptonews.com/news/feed/"),
        SourceConfig::feed("decrypt", "Decrypt", "https://decrypt.co/feed"),
        SourceConfig::feed("blockworks", "Blockworks", "https://blockworks.co/feed/"),
        SourceConfig::feed("theblock", "The Block", "https://www.theblock.co/rss.xml"),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub collection: CollectionConfig,
    pub alerts: AlertsConfig,
    pub ingest: IngestConfig,
    pub jobs: JobsConfig,
    pub market: MarketConfig,
    pub sources: Vec<SourceConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            collection: CollectionConfig::default(),
            alerts: AlertsConfig::default(),
            ingest: IngestConfig::default(),
            jobs: JobsConfig::default(),
            market: MarketConfig::default(),
            sources: default_sources(),
        }
    }
}

impl AppConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing config {}", path.display()))
    }

    /// Load using env var + fallbacks, then apply env overrides and validate:
    /// 1) $NEWSFLOW_CONFIG_PATH
    /// 2) config/newsflow.toml
    /// 3) config/newsflow.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = Self::load_file_default()?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn load_file_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
        let toml_p = PathBuf::from("config/newsflow.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/newsflow.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Ok(Self::default())
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_parse("COLLECTION_INTERVAL_SECS")? {
            self.collection.interval_secs = v;
        }
        if let Some(v) = env_parse("ALERT_INTERVAL_SECS")? {
            self.alerts.interval_secs = v;
        }
        if let Some(v) = env_parse("FETCH_TIMEOUT_SECS")? {
            self.ingest.fetch_timeout_secs = v;
        }
        if let Some(v) = env_parse("MAX_CONCURRENT_FETCHES")? {
            self.ingest.max_concurrent_fetches = v;
        }
        if let Some(v) = env_parse("PROCESSOR_TIMEOUT_SECS")? {
            self.jobs.processor_timeout_secs = v;
        }
        if let Ok(key) = std::env::var("COINGECKO_API_KEY") {
            let key = key.trim();
            if !key.is_empty() {
                self.market.api_key = Some(key.to_string());
            }
        }
        if let Ok(v) = std::env::var("MARKET_ALERTS_ENABLED") {
            self.market.enabled = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("SCHEDULER_AUTOSTART") {
            let on = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
            self.collection.autostart = on;
            self.alerts.autostart = on;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection.interval_secs == 0 {
            bail!("collection.interval_secs must be > 0");
        }
        if self.alerts.interval_secs == 0 {
            bail!("alerts.interval_secs must be > 0");
        }
        if self.ingest.fetch_timeout_secs == 0 {
            bail!("ingest.fetch_timeout_secs must be > 0");
        }
        if self.ingest.max_concurrent_fetches == 0 {
            bail!("ingest.max_concurrent_fetches must be > 0");
        }
        if self.jobs.processor_timeout_secs == 0 {
            bail!("jobs.processor_timeout_secs must be > 0");
        }
        if self.market.enabled {
            if self.market.limit == 0 || self.market.timeout_secs == 0 {
                bail!("market.limit and market.timeout_secs must be > 0");
            }
            if self.market.volume_spike_ratio <= 0.0 {
                bail!("market.volume_spike_ratio must be > 0");
            }
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("{key}={raw:?}: {e}")),
        Err(_) => Ok(None),
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AppConfig> {
    match hint_ext {
        "toml" => Ok(toml::from_str(s)?),
        "json" => Ok(serde_json::from_str(s)?),
        // No usable extension: JSON if it looks like an object, else TOML.
        _ if s.trim_start().starts_with('{') => Ok(serde_json::from_str(s)?),
        _ => Ok(toml::from_str(s)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = parse_config(
            r#"
            [collection]
            interval_secs = 60

            [alerts]
            autostart = true

            [ingest]
            keywords = ["bitcoin"]
            "#,
            "toml",
        )
        .unwrap();
        assert_eq!(cfg.collection.interval_secs, 60);
        assert!(!cfg.collection.autostart);
        assert_eq!(cfg.alerts.interval_secs, 600);
        assert!(cfg.alerts.autostart);
        assert_eq!(cfg.ingest.max_entries_per_feed, 20);
        assert_eq!(cfg.ingest.keywords, vec!["bitcoin".to_string()]);
        assert_eq!(cfg.sources.len(), 7);
    }

    #[test]
    fn json_sources_default_to_enabled() {
        let cfg = parse_config(
            r#"{"sources": [{"id": "a", "name": "A", "url": "https://a.test/rss"},
                            {"id": "b", "name": "B", "url": "https://b.test/rss", "enabled": false}]}"#,
            "",
        )
        .unwrap();
        assert!(cfg.sources[0].enabled);
        assert!(!cfg.sources[1].to_source().enabled);
    }

    #[test]
    fn zero_values_are_rejected() {
        let mut cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.ingest.max_concurrent_fetches = 0;
        assert!(cfg.validate().is_err());
        cfg = AppConfig::default();
        cfg.alerts.interval_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn market_section_is_checked_only_when_enabled() {
        let mut cfg = parse_config(
            r#"
            [market]
            limit = 0
            "#,
            "toml",
        )
        .unwrap();
        assert_eq!(cfg.market.min_price_change_pct, 3.0);
        assert!(cfg.validate().is_ok());
        cfg.market.enabled = true;
        assert!(cfg.validate().is_err());
        cfg.market.limit = 100;
        assert!(cfg.validate().is_ok());
    }
}
