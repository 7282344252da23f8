// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod alerts;
pub mod api;
pub mod config;
pub mod ingest;
pub mod jobs;
pub mod metrics;
pub mod scheduler;
pub mod sentiment;
pub mod stats;
pub mod store;

pub use crate::api::{router, AppState};
pub use crate::config::AppConfig;
pub use crate::scheduler::{Cycle, PeriodicTask, SchedulerStatus};
