// src/alerts/coingecko.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::histogram;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;

use crate::alerts::{AlertType, MarketMonitor, MarketSignal};
use crate::config::MarketConfig;
use crate::ingest::fetch::DEFAULT_USER_AGENT;

/// CoinGecko's page size limit for `/coins/markets`.
const MAX_PER_PAGE: usize = 250;

/// One row of `/coins/markets`. CoinGecko sends nulls for thin markets.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CoinMarket {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,
    pub total_volume: Option<f64>,
    pub market_cap: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalThresholds {
    pub min_price_change_pct: f64,
    pub volume_spike_ratio: f64,
}

impl From<&MarketConfig> for SignalThresholds {
    fn from(c: &MarketConfig) -> Self {
        Self {
            min_price_change_pct: c.min_price_change_pct,
            volume_spike_ratio: c.volume_spike_ratio,
        }
    }
}

/// 24h price moves past the threshold become `price_surge`/`price_drop` with
/// the percent change as magnitude. Volume over market cap past the spike
/// ratio becomes `volume_spike`, scaled so the ratio itself grades medium and
/// twice the ratio grades high.
pub fn market_signals(markets: &[CoinMarket], t: SignalThresholds) -> Vec<MarketSignal> {
    let mut out = Vec::new();
    for m in markets {
        let symbol = m.symbol.to_uppercase();

        if let Some(pct) = m.price_change_percentage_24h {
            if pct.abs() >= t.min_price_change_pct {
                let (alert_type, verb) = if pct > 0.0 {
                    (AlertType::PriceSurge, "up")
                } else {
                    (AlertType::PriceDrop, "down")
                };
                let price = m
                    .current_price
                    .map(|p| format!(" at {p}"))
                    .unwrap_or_default();
                out.push(MarketSignal {
                    symbol: symbol.clone(),
                    alert_type,
                    magnitude: pct,
                    title: format!("{} {verb} {:.1}% in 24h", m.name, pct.abs()),
                    description: format!("{symbol} moved {pct:+.2}% over 24h{price}"),
                });
            }
        }

        if let (Some(volume), Some(cap)) = (m.total_volume, m.market_cap) {
            if cap > 0.0 && t.volume_spike_ratio > 0.0 {
                let ratio = volume / cap;
                if ratio >= t.volume_spike_ratio {
                    out.push(MarketSignal {
                        symbol: symbol.clone(),
                        alert_type: AlertType::VolumeSpike,
                        magnitude: ratio / t.volume_spike_ratio * 5.0,
                        title: format!("{} volume spike", m.name),
                        description: format!(
                            "24h volume is {:.0}% of market cap",
                            ratio * 100.0
                        ),
                    });
                }
            }
        }
    }
    out
}

/// Market monitor over CoinGecko's `/coins/markets` endpoint.
pub struct CoinGeckoMonitor {
    client: reqwest::Client,
    base_url: String,
    vs_currency: String,
    per_page: usize,
    thresholds: SignalThresholds,
}

impl CoinGeckoMonitor {
    pub fn new(cfg: &MarketConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = cfg.api_key.as_deref() {
            let value = HeaderValue::from_str(key).context("coingecko api key is not a valid header")?;
            headers.insert("x-cg-demo-api-key", value);
        }
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building coingecko http client")?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            vs_currency: cfg.vs_currency.clone(),
            per_page: cfg.limit.clamp(1, MAX_PER_PAGE),
            thresholds: SignalThresholds::from(cfg),
        })
    }

    /// Top coins by market cap with their 24h change.
    pub async fn fetch_markets(&self) -> Result<Vec<CoinMarket>> {
        let url = format!("{}/coins/markets", self.base_url);
        let per_page = self.per_page.to_string();
        let t0 = std::time::Instant::now();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("vs_currency", self.vs_currency.as_str()),
                ("order", "market_cap_desc"),
                ("per_page", per_page.as_str()),
                ("page", "1"),
                ("sparkline", "false"),
                ("price_change_percentage", "24h"),
            ])
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        let markets: Vec<CoinMarket> = resp.json().await.context("decoding coingecko markets")?;
        histogram!("market_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        tracing::debug!(target: "alerts", coins = markets.len(), "market data fetched");
        Ok(markets)
    }
}

#[async_trait]
impl MarketMonitor for CoinGeckoMonitor {
    async fn scan(&self) -> Result<Vec<MarketSignal>> {
        let markets = self.fetch_markets().await?;
        Ok(market_signals(&markets, self.thresholds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(symbol: &str, pct: Option<f64>, volume: Option<f64>, cap: Option<f64>) -> CoinMarket {
        CoinMarket {
            id: symbol.to_lowercase(),
            symbol: symbol.to_lowercase(),
            name: symbol.to_string(),
            current_price: Some(1.0),
            price_change_percentage_24h: pct,
            total_volume: volume,
            market_cap: cap,
        }
    }

    const T: SignalThresholds = SignalThresholds {
        min_price_change_pct: 3.0,
        volume_spike_ratio: 0.25,
    };

    #[test]
    fn price_moves_below_threshold_are_ignored() {
        let signals = market_signals(&[coin("BTC", Some(2.9), None, None)], T);
        assert!(signals.is_empty());
    }

    #[test]
    fn direction_picks_surge_or_drop() {
        let signals = market_signals(
            &[
                coin("SOL", Some(12.4), None, None),
                coin("ETH", Some(-6.0), None, None),
            ],
            T,
        );
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].symbol, "SOL");
        assert_eq!(signals[0].alert_type, AlertType::PriceSurge);
        assert_eq!(signals[0].magnitude, 12.4);
        assert_eq!(signals[1].alert_type, AlertType::PriceDrop);
        assert_eq!(signals[1].magnitude, -6.0);
    }

    #[test]
    fn volume_spike_scales_with_ratio() {
        let signals = market_signals(
            &[
                coin("PEPE", None, Some(500.0), Some(1_000.0)),
                coin("DOGE", None, Some(100.0), Some(1_000.0)),
                coin("NEW", None, Some(100.0), Some(0.0)),
            ],
            T,
        );
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].alert_type, AlertType::VolumeSpike);
        assert!((signals[0].magnitude - 10.0).abs() < 1e-9);
    }

    #[test]
    fn null_fields_decode() {
        let rows: Vec<CoinMarket> = serde_json::from_str(
            r#"[{"id":"x","symbol":"x","name":"X","current_price":null,
                "price_change_percentage_24h":null,"total_volume":null,"market_cap":null,
                "ath":1.0}]"#,
        )
        .unwrap();
        assert!(market_signals(&rows, T).is_empty());
    }
}
