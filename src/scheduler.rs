//! Daily story scheduler.
//!
//! One tokio task sleeps until the configured UTC time, fires a full story
//! run, and goes back to sleep until the next day. An overlap guard makes a
//! manual trigger and the timer mutually exclusive so a slow run is never
//! doubled up.

use crate::media::MediaTransport;
use crate::story::generator::Generator;
use crate::story::pipeline::{StoryDelivery, StoryPipeline};
use crate::RunSummary;
use chrono::{DateTime, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// When the next run should fire, given the current time and the configured
/// UTC wall-clock target.
fn next_fire(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let target = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(target).and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

/// Scheduler that owns the daily timer and the run overlap guard.
pub struct DailyScheduler<T, G, D> {
    pipeline: Arc<StoryPipeline<T, G, D>>,
    /// Held for the duration of a run; `try_lock` failure means one is
    /// already in flight.
    run_gate: Arc<Mutex<()>>,
    last_run: Arc<RwLock<Option<RunSummary>>>,
    timer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<T, G, D> DailyScheduler<T, G, D>
where
    T: MediaTransport + Send + Sync + 'static,
    G: Generator + 'static,
    D: StoryDelivery + 'static,
{
    pub fn new(pipeline: Arc<StoryPipeline<T, G, D>>) -> Self {
        Self {
            pipeline,
            run_gate: Arc::new(Mutex::new(())),
            last_run: Arc::new(RwLock::new(None)),
            timer: Mutex::new(None),
        }
    }

    /// Start the daily timer loop firing at `hour:minute` UTC.
    pub async fn start(&self, hour: u32, minute: u32) {
        let pipeline = self.pipeline.clone();
        let run_gate = self.run_gate.clone();
        let last_run = self.last_run.clone();

        let handle = tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let fire_at = next_fire(now, hour, minute);
                let wait = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
                tracing::info!(fire_at = %fire_at, "next story run scheduled");
                tokio::time::sleep(wait).await;

                match run_gate.try_lock() {
                    Ok(_guard) => {
                        tracing::info!("scheduled story run firing");
                        let summary = pipeline.run_all().await;
                        *last_run.write().await = Some(summary);
                    }
                    Err(_) => {
                        tracing::warn!("previous story run still in flight, skipping this firing");
                    }
                }
            }
        });

        let mut timer = self.timer.lock().await;
        if let Some(old) = timer.replace(handle) {
            old.abort();
        }
        tracing::info!(hour, minute, "daily story scheduler started");
    }

    /// Run a full story pass immediately, outside the timer.
    ///
    /// Returns `None` when a run is already in flight.
    pub async fn trigger_now(&self) -> Option<RunSummary> {
        match self.run_gate.try_lock() {
            Ok(_guard) => {
                tracing::info!("story run triggered manually");
                let summary = self.pipeline.run_all().await;
                *self.last_run.write().await = Some(summary.clone());
                Some(summary)
            }
            Err(_) => {
                tracing::warn!("story run already in flight, manual trigger ignored");
                None
            }
        }
    }

    /// Summary of the most recent completed run, if any.
    pub async fn last_run(&self) -> Option<RunSummary> {
        self.last_run.read().await.clone()
    }

    /// Stop the timer task.
    pub async fn shutdown(&self) {
        let handle = {
            let mut timer = self.timer.lock().await;
            timer.take()
        };
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            tracing::debug!("story scheduler stopped");
        }
    }
}
