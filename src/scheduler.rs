//! # Periodic task
//! Timer-driven runner shared by the collection and alert schedulers.
//!
//! One cycle at a time per instance: a tick that lands while the previous
//! cycle is still running is skipped, never queued. `stop()` cancels future
//! ticks only; an in-flight cycle always runs to completion.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// One unit of periodic work.
#[async_trait]
pub trait Cycle: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Short task name used in logs and metric labels.
    fn name(&self) -> &'static str;

    async fn run_cycle(&self) -> anyhow::Result<Self::Output>;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub is_running: bool,
    /// Milliseconds.
    pub interval: u64,
    pub next_execution: Option<DateTime<Utc>>,
    pub in_flight: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub error_count: u64,
    pub skipped_count: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct LastRun {
    at: Option<DateTime<Utc>>,
    error: Option<String>,
}

struct Shared<C> {
    cycle: Arc<C>,
    in_flight: AtomicBool,
    run_count: AtomicU64,
    error_count: AtomicU64,
    skipped_count: AtomicU64,
    last: Mutex<LastRun>,
}

/// Clears the in-flight flag however the cycle ends (ok, error or panic).
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl<C: Cycle> Shared<C> {
    /// `None` when skipped because another cycle holds the in-flight flag.
    async fn run_guarded(&self, trigger: &'static str) -> Option<anyhow::Result<C::Output>> {
        let task = self.cycle.name();
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.skipped_count.fetch_add(1, Ordering::Relaxed);
            counter!("scheduler_skipped_total", "task" => task).increment(1);
            tracing::warn!(target: "scheduler", task, trigger, "cycle already in flight, skipping");
            return None;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let started_at = Utc::now();
        let t0 = Instant::now();
        tracing::info!(target: "scheduler", task, trigger, "cycle started");

        let result = self.cycle.run_cycle().await;

        self.run_count.fetch_add(1, Ordering::Relaxed);
        counter!("scheduler_cycles_total", "task" => task).increment(1);
        let elapsed_ms = t0.elapsed().as_millis() as u64;
        {
            let mut last = lock(&self.last);
            last.at = Some(started_at);
            match &result {
                Ok(_) => {
                    last.error = None;
                    tracing::info!(target: "scheduler", task, trigger, elapsed_ms, "cycle finished");
                }
                Err(e) => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    counter!("scheduler_cycle_errors_total", "task" => task).increment(1);
                    let msg = format!("{e:#}");
                    tracing::error!(target: "scheduler", task, trigger, elapsed_ms, error = %msg, "cycle failed");
                    last.error = Some(msg);
                }
            }
        }
        Some(result)
    }
}

/// Periodic runner with its own cancellation token per armed timer.
pub struct PeriodicTask<C: Cycle> {
    shared: Arc<Shared<C>>,
    interval: Duration,
    timer: Mutex<Option<CancellationToken>>,
}

impl<C: Cycle> PeriodicTask<C> {
    pub fn new(cycle: Arc<C>, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                cycle,
                in_flight: AtomicBool::new(false),
                run_count: AtomicU64::new(0),
                error_count: AtomicU64::new(0),
                skipped_count: AtomicU64::new(0),
                last: Mutex::new(LastRun::default()),
            }),
            // tokio's interval panics on zero
            interval: interval.max(Duration::from_millis(1)),
            timer: Mutex::new(None),
        }
    }

    pub fn cycle(&self) -> &Arc<C> {
        &self.shared.cycle
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        lock(&self.timer).is_some()
    }

    /// Arms the timer; the first tick fires immediately. Returns `false` (and
    /// only logs) if already running. Must be called inside a tokio runtime.
    pub fn start(&self) -> bool {
        let task = self.shared.cycle.name();
        let token = {
            let mut timer = lock(&self.timer);
            if timer.is_some() {
                tracing::warn!(target: "scheduler", task, "scheduler is already running");
                return false;
            }
            let token = CancellationToken::new();
            *timer = Some(token.clone());
            token
        };

        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // Detached: the in-flight guard, not this loop, serializes cycles.
                        let shared = Arc::clone(&shared);
                        tokio::spawn(async move {
                            let _ = shared.run_guarded("timer").await;
                        });
                    }
                }
            }
            tracing::debug!(target: "scheduler", task, "timer disarmed");
        });

        tracing::info!(
            target: "scheduler",
            task,
            interval_ms = interval.as_millis() as u64,
            "scheduler started"
        );
        true
    }

    /// Disarms the timer. Returns `false` (and only logs) if not running.
    pub fn stop(&self) -> bool {
        let task = self.shared.cycle.name();
        match lock(&self.timer).take() {
            Some(token) => {
                token.cancel();
                tracing::info!(target: "scheduler", task, "scheduler stopped");
                true
            }
            None => {
                tracing::warn!(target: "scheduler", task, "scheduler is not running");
                false
            }
        }
    }

    pub fn restart(&self) -> bool {
        self.stop();
        self.start()
    }

    /// One cycle outside the timer cadence, under the same overlap guard.
    /// `Ok(None)` means it was skipped because a cycle is already in flight.
    pub async fn execute_manually(&self) -> anyhow::Result<Option<C::Output>> {
        match self.shared.run_guarded("manual").await {
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let is_running = self.is_running();
        let last = lock(&self.shared.last);
        let interval =
            chrono::Duration::from_std(self.interval).unwrap_or_else(|_| chrono::Duration::zero());
        SchedulerStatus {
            is_running,
            interval: self.interval.as_millis() as u64,
            next_execution: is_running.then(|| Utc::now() + interval),
            in_flight: self.shared.in_flight.load(Ordering::Acquire),
            last_run_at: last.at,
            run_count: self.shared.run_count.load(Ordering::Relaxed),
            error_count: self.shared.error_count.load(Ordering::Relaxed),
            skipped_count: self.shared.skipped_count.load(Ordering::Relaxed),
            last_error: last.error.clone(),
        }
    }
}

impl<C: Cycle> Drop for PeriodicTask<C> {
    fn drop(&mut self) {
        let timer = self
            .timer
            .get_mut()
            .unwrap_or_else(|poison| poison.into_inner());
        if let Some(token) = timer.take() {
            token.cancel();
        }
    }
}
