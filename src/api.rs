use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::alerts::coingecko::CoinGeckoMonitor;
use crate::alerts::{Alert, AlertGenerationCycle, CompositeMonitor, MarketMonitor, NewsSignalMonitor};
use crate::config::AppConfig;
use crate::ingest::types::{FeedFetcher, Source};
use crate::ingest::{CollectError, FeedIngestionPipeline, IngestOptions};
use crate::jobs::processors::register_default_processors;
use crate::jobs::{Job, JobPayload, JobQueue, JobStats};
use crate::scheduler::{PeriodicTask, SchedulerStatus};
use crate::stats::{StatsAggregator, TimeRange, WorkflowStats};
use crate::store::{AlertRepository, MemoryStore, SourceRepository, StoreError};

const ALERTS_DEFAULT_LIMIT: usize = 20;
const ALERTS_MAX_LIMIT: usize = 500;

/// Everything the handlers need, passed explicitly; no module-level singletons.
#[derive(Clone)]
pub struct AppState {
    pub collection: Arc<PeriodicTask<FeedIngestionPipeline>>,
    pub alerts: Arc<PeriodicTask<AlertGenerationCycle>>,
    pub queue: Arc<JobQueue>,
    pub sources: Arc<dyn SourceRepository>,
    pub alert_log: Arc<dyn AlertRepository>,
    pub stats: StatsAggregator,
}

impl AppState {
    /// Wires the pipeline, both schedulers and the job queue over one store.
    /// Alerts come from [`NewsSignalMonitor`], plus CoinGecko market data when
    /// `market.enabled` is set.
    pub fn new(cfg: &AppConfig, store: Arc<MemoryStore>, fetcher: Arc<dyn FeedFetcher>) -> Self {
        let mut monitor =
            CompositeMonitor::new().with("news", Arc::new(NewsSignalMonitor::new(store.clone())));
        if cfg.market.enabled {
            match CoinGeckoMonitor::new(&cfg.market) {
                Ok(m) => monitor = monitor.with("market", Arc::new(m)),
                Err(e) => {
                    tracing::warn!(error = %format!("{e:#}"), "market monitor disabled")
                }
            }
        }
        Self::with_monitor(cfg, store, fetcher, Arc::new(monitor))
    }

    pub fn with_monitor(
        cfg: &AppConfig,
        store: Arc<MemoryStore>,
        fetcher: Arc<dyn FeedFetcher>,
        monitor: Arc<dyn MarketMonitor>,
    ) -> Self {
        let pipeline = FeedIngestionPipeline::new(
            store.clone(),
            store.clone(),
            fetcher,
            IngestOptions::from(&cfg.ingest),
        );
        let collection = PeriodicTask::new(
            Arc::new(pipeline),
            Duration::from_secs(cfg.collection.interval_secs),
        );
        let alerts = PeriodicTask::new(
            Arc::new(AlertGenerationCycle::new(monitor, store.clone())),
            Duration::from_secs(cfg.alerts.interval_secs),
        );

        let queue = JobQueue::new(Duration::from_secs(cfg.jobs.processor_timeout_secs));
        register_default_processors(&queue, store.clone());

        Self {
            collection: Arc::new(collection),
            alerts: Arc::new(alerts),
            stats: StatsAggregator::new(queue.clone(), store.clone()),
            queue,
            sources: store.clone(),
            alert_log: store,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(json!({ "status": "error", "error": self.to_string() })),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => ApiError::NotFound(m),
            StoreError::Conflict(m) => ApiError::Conflict(m),
            StoreError::Unavailable(m) => ApiError::Unavailable(m),
        }
    }
}

impl From<CollectError> for ApiError {
    fn from(e: CollectError) -> Self {
        match e {
            CollectError::NotFound(_) => ApiError::NotFound(e.to_string()),
            CollectError::Disabled(_) => ApiError::BadRequest(e.to_string()),
            CollectError::Store(se) => se.into(),
            CollectError::Fetch(_) => ApiError::Internal(e.to_string()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/collect-all", post(collect_all))
        .route("/sources", get(list_sources).post(add_source))
        .route("/sources/{id}/collect", post(collect_source))
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/stats", get(job_stats))
        .route("/jobs/{id}", get(get_job))
        .route("/alerts", get(recent_alerts))
        .route("/alerts/generate", post(generate_alerts))
        .route("/alerts/scheduler/start", post(alerts_start))
        .route("/alerts/scheduler/stop", post(alerts_stop))
        .route("/workflow/stats", get(workflow_stats))
        .route("/scheduler-status", get(scheduler_status))
        .route("/scheduler/start", post(scheduler_start))
        .route("/scheduler/stop", post(scheduler_stop))
        .route("/scheduler/restart", post(scheduler_restart))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// 200 with the cycle output, 409 when another cycle holds the guard.
fn manual_cycle_response<T: Serialize>(
    outcome: anyhow::Result<Option<T>>,
    busy: &str,
) -> Result<Response, ApiError> {
    match outcome {
        Ok(Some(out)) => Ok(Json(out).into_response()),
        Ok(None) => Ok((
            StatusCode::CONFLICT,
            Json(json!({ "skipped": true, "reason": busy })),
        )
            .into_response()),
        Err(e) => Err(ApiError::Internal(format!("{e:#}"))),
    }
}

async fn collect_all(State(state): State<AppState>) -> Result<Response, ApiError> {
    manual_cycle_response(
        state.collection.execute_manually().await,
        "collection already in progress",
    )
}

async fn list_sources(State(state): State<AppState>) -> Result<Json<Vec<Source>>, ApiError> {
    Ok(Json(state.sources.list_sources().await?))
}

#[derive(Debug, Deserialize)]
struct NewSource {
    #[serde(default)]
    id: Option<String>,
    name: String,
    url: String,
    #[serde(default)]
    enabled: Option<bool>,
}

async fn add_source(
    State(state): State<AppState>,
    Json(body): Json<NewSource>,
) -> Result<(StatusCode, Json<Source>), ApiError> {
    let url = body.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ApiError::BadRequest(format!("invalid feed url {url:?}")));
    }
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".into()));
    }
    let id = body
        .id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut source = Source::new(&id, name, url);
    if body.enabled == Some(false) {
        source = source.disabled();
    }
    state
        .sources
        .add_source(source.clone())
        .await
        .map_err(|e| match e {
            StoreError::Conflict(m) => ApiError::BadRequest(format!("source already exists: {m}")),
            other => other.into(),
        })?;
    tracing::info!(target: "ingest", source_id = %id, url = %source.url, "source registered");
    Ok((StatusCode::CREATED, Json(source)))
}

async fn collect_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pipeline = state.collection.cycle().clone();
    pipeline.collectable_source(&id).await?;

    let source_id = id.clone();
    tokio::spawn(async move {
        // Outcome is recorded on the source itself.
        let _ = pipeline.collect_source(&source_id).await;
    });
    Ok(Json(json!({ "started": true, "sourceId": id })))
}

async fn list_jobs(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.queue.get_all_jobs())
}

async fn job_stats(State(state): State<AppState>) -> Json<JobStats> {
    Json(state.queue.get_stats())
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    state
        .queue
        .get_job(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))
}

async fn create_job(
    State(state): State<AppState>,
    Json(payload): Json<JobPayload>,
) -> (StatusCode, Json<serde_json::Value>) {
    let id = state.queue.add_job(payload);
    (StatusCode::ACCEPTED, Json(json!({ "jobId": id })))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    limit: Option<usize>,
}

async fn recent_alerts(
    State(state): State<AppState>,
    Query(q): Query<AlertsQuery>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let limit = q
        .limit
        .unwrap_or(ALERTS_DEFAULT_LIMIT)
        .clamp(1, ALERTS_MAX_LIMIT);
    Ok(Json(state.alert_log.recent(limit).await?))
}

async fn generate_alerts(State(state): State<AppState>) -> Result<Response, ApiError> {
    manual_cycle_response(
        state.alerts.execute_manually().await,
        "alert generation already in progress",
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsQuery {
    time_range: Option<String>,
}

async fn workflow_stats(
    State(state): State<AppState>,
    Query(q): Query<StatsQuery>,
) -> Result<Json<WorkflowStats>, ApiError> {
    let range = match q.time_range.as_deref() {
        None | Some("") => TimeRange::default(),
        Some(raw) => raw
            .parse::<TimeRange>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
    };
    state
        .stats
        .workflow_stats(range)
        .await
        .map(Json)
        .map_err(|e| ApiError::Internal(format!("{e:#}")))
}

#[derive(Debug, Serialize)]
struct StatusOut {
    #[serde(flatten)]
    collection: SchedulerStatus,
    alerts: SchedulerStatus,
}

async fn scheduler_status(State(state): State<AppState>) -> Json<StatusOut> {
    Json(StatusOut {
        collection: state.collection.status(),
        alerts: state.alerts.status(),
    })
}

async fn scheduler_start(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "started": state.collection.start() }))
}

async fn scheduler_stop(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "stopped": state.collection.stop() }))
}

async fn scheduler_restart(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "started": state.collection.restart() }))
}

async fn alerts_start(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "started": state.alerts.start() }))
}

async fn alerts_stop(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "stopped": state.alerts.stop() }))
}
