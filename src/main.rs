//! newsflow binary entrypoint.
//! Loads config, seeds the store, wires schedulers + job queue and boots the
//! Axum HTTP server on Shuttle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use newsflow::config::{AppConfig, SourceConfig};
use newsflow::ingest::fetch::HttpFeedFetcher;
use newsflow::metrics::Metrics;
use newsflow::store::MemoryStore;
use newsflow::{api, AppState};

/// Compact logs by default, JSON with NEWSFLOW_LOG_JSON=1.
/// No-op if the runtime already installed a subscriber.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ingest=info,scheduler=info,jobs=info"));
    let json = std::env::var("NEWSFLOW_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default().context("loading newsflow config")?;

    let store = Arc::new(
        MemoryStore::new().with_sources(cfg.sources.iter().map(SourceConfig::to_source)),
    );
    let fetcher = HttpFeedFetcher::new(
        &cfg.ingest.user_agent,
        Duration::from_secs(cfg.ingest.fetch_timeout_secs),
    )?;

    let state = AppState::new(&cfg, store, Arc::new(fetcher));
    if cfg.collection.autostart {
        state.collection.start();
    }
    if cfg.alerts.autostart {
        state.alerts.start();
    }

    let mut router = api::router(state);
    match Metrics::install(&cfg) {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => tracing::warn!(error = %e, "metrics disabled"),
    }

    tracing::info!(
        sources = cfg.sources.len(),
        collection_interval_secs = cfg.collection.interval_secs,
        alert_interval_secs = cfg.alerts.interval_secs,
        "newsflow ready"
    );
    Ok(router.into())
}
