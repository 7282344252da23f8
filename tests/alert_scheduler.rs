// tests/alert_scheduler.rs
//
// Alert generation driven by the shared periodic runner, with a scripted monitor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use newsflow::alerts::coingecko::CoinGeckoMonitor;
use newsflow::alerts::{
    AlertCycleSummary, AlertGenerationCycle, AlertLevel, AlertType, MarketMonitor, MarketSignal,
};
use newsflow::config::MarketConfig;
use newsflow::store::{AlertRepository, MemoryStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use newsflow::PeriodicTask;

/// Emits the same three signals on every scan; fails every third scan.
#[derive(Default)]
struct ScriptedMonitor {
    scans: AtomicUsize,
}

fn signal(symbol: &str, alert_type: AlertType, magnitude: f64) -> MarketSignal {
    MarketSignal {
        symbol: symbol.into(),
        alert_type,
        magnitude,
        title: format!("{symbol} moved {magnitude:+.1}%"),
        description: "scripted".into(),
    }
}

#[async_trait]
impl MarketMonitor for ScriptedMonitor {
    async fn scan(&self) -> anyhow::Result<Vec<MarketSignal>> {
        let n = self.scans.fetch_add(1, Ordering::SeqCst) + 1;
        if n % 3 == 0 {
            anyhow::bail!("price api unavailable");
        }
        Ok(vec![
            signal("BTC", AlertType::PriceSurge, 12.0),
            signal("ETH", AlertType::PriceDrop, -6.5),
            signal("DOGE", AlertType::VolumeSpike, 2.0),
        ])
    }
}

#[tokio::test]
async fn manual_generation_grades_each_signal() {
    let store = Arc::new(MemoryStore::new());
    let task = PeriodicTask::new(
        Arc::new(AlertGenerationCycle::new(
            Arc::new(ScriptedMonitor::default()),
            store.clone(),
        )),
        Duration::from_secs(600),
    );

    let summary = task.execute_manually().await.unwrap().unwrap();
    assert_eq!(
        summary,
        AlertCycleSummary {
            generated: 3,
            high: 1,
            medium: 1,
            low: 1
        }
    );

    let alerts = store.recent(10).await.unwrap();
    let level_of = |sym: &str| alerts.iter().find(|a| a.symbol == sym).unwrap().level;
    assert_eq!(level_of("BTC"), AlertLevel::High);
    assert_eq!(level_of("ETH"), AlertLevel::Medium);
    assert_eq!(level_of("DOGE"), AlertLevel::Low);
}

#[tokio::test(start_paused = true)]
async fn monitor_failure_skips_one_tick_only() {
    let store = Arc::new(MemoryStore::new());
    let task = PeriodicTask::new(
        Arc::new(AlertGenerationCycle::new(
            Arc::new(ScriptedMonitor::default()),
            store.clone(),
        )),
        Duration::from_secs(600),
    );

    task.start();
    // Ticks at 0, 600, 1200 and 1800s; the third scan fails.
    tokio::time::sleep(Duration::from_secs(1_800) + Duration::from_millis(10)).await;
    task.stop();

    let status = task.status();
    assert_eq!(status.run_count, 4);
    assert_eq!(status.error_count, 1);
    assert!(status.last_error.is_none(), "fourth tick succeeded");
    assert_eq!(store.recent(100).await.unwrap().len(), 9);
}

/// Local stand-in for CoinGecko's `/coins/markets`; demands the demo key.
async fn fake_coingecko() -> String {
    async fn markets(
        headers: HeaderMap,
        Query(q): Query<HashMap<String, String>>,
    ) -> Result<Json<Value>, StatusCode> {
        if headers.get("x-cg-demo-api-key").map(|v| v.as_bytes()) != Some(b"demo-key".as_slice()) {
            return Err(StatusCode::UNAUTHORIZED);
        }
        assert_eq!(q.get("vs_currency").map(String::as_str), Some("usd"));
        assert_eq!(q.get("per_page").map(String::as_str), Some("3"));
        Ok(Json(json!([
            {"id": "bitcoin", "symbol": "btc", "name": "Bitcoin", "current_price": 71000.0,
             "price_change_percentage_24h": 11.2, "total_volume": 3.0e10, "market_cap": 1.4e12},
            {"id": "ethereum", "symbol": "eth", "name": "Ethereum", "current_price": 3400.0,
             "price_change_percentage_24h": -5.5, "total_volume": 1.5e10, "market_cap": 4.0e11},
            {"id": "pepe", "symbol": "pepe", "name": "Pepe", "current_price": null,
             "price_change_percentage_24h": 1.0, "total_volume": 2.0e9, "market_cap": 4.0e9}
        ])))
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/api/v3/coins/markets", get(markets));
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}/api/v3")
}

fn market_config(base_url: String, api_key: Option<&str>) -> MarketConfig {
    MarketConfig {
        enabled: true,
        base_url,
        api_key: api_key.map(str::to_string),
        limit: 3,
        ..MarketConfig::default()
    }
}

#[tokio::test]
async fn coingecko_markets_become_price_and_volume_alerts() {
    let base = fake_coingecko().await;
    let monitor = CoinGeckoMonitor::new(&market_config(base, Some("demo-key"))).unwrap();
    let store = Arc::new(MemoryStore::new());
    let cycle = AlertGenerationCycle::new(Arc::new(monitor), store.clone());

    let summary = cycle.generate().await.unwrap();
    // BTC surge, ETH drop, PEPE volume at 50% of cap.
    assert_eq!(
        summary,
        AlertCycleSummary {
            generated: 3,
            high: 2,
            medium: 1,
            low: 0
        }
    );
    let alerts = store.recent(10).await.unwrap();
    let find = |t: AlertType| alerts.iter().find(|a| a.alert_type == t).unwrap();
    assert_eq!(find(AlertType::PriceSurge).symbol, "BTC");
    assert_eq!(find(AlertType::PriceDrop).level, AlertLevel::Medium);
    assert_eq!(find(AlertType::VolumeSpike).symbol, "PEPE");
}

#[tokio::test]
async fn coingecko_http_errors_fail_the_scan() {
    let base = fake_coingecko().await;
    let monitor = CoinGeckoMonitor::new(&market_config(base, None)).unwrap();
    let err = monitor.scan().await.unwrap_err();
    assert!(format!("{err:#}").contains("401"), "{err:#}");
}
