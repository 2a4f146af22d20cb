//! Poll scheduler - wall-clock aligned background ticks
//!
//! Each firing lands on the next instant that is an exact multiple of the
//! interval since the Unix epoch. The wait is recomputed from the current time
//! before every firing, so drift never accumulates, and a slow tick simply
//! skips the boundaries it overran instead of queuing a burst.

use chrono::{DateTime, Utc};
use std::future::Future;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Next boundary at or after `now`, `interval_us` microseconds apart
///
/// Returns `None` only when the boundary falls outside chrono's range.
pub fn next_boundary(now: DateTime<Utc>, interval_us: i64) -> Option<DateTime<Utc>> {
    let interval_us = interval_us.max(1);
    let micros = now.timestamp_micros();
    let rem = micros.rem_euclid(interval_us);
    let boundary = if rem == 0 { micros } else { micros - rem + interval_us };
    DateTime::from_timestamp_micros(boundary)
}

fn interval_micros(interval_secs: f64) -> i64 {
    ((interval_secs * 1_000_000.0).round() as i64).max(1)
}

/// Handle to a running poll loop
pub struct PollScheduler {
    interval_secs: f64,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PollScheduler {
    /// Spawn the poll loop on the current tokio runtime
    ///
    /// Arguments:
    /// - `interval_secs`: Period between boundaries (seconds, > 0)
    /// - `tick`: Called with the boundary each firing was aimed at; awaited
    ///   inline so ticks never overlap
    pub fn start<F, Fut>(interval_secs: f64, mut tick: F) -> Self
    where
        F: FnMut(DateTime<Utc>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let interval_us = interval_micros(interval_secs);

        let handle = tokio::spawn(async move {
            log::info!("⏰ Poll scheduler started (interval: {}s)", interval_secs);
            let mut last: Option<DateTime<Utc>> = None;

            loop {
                let now = Utc::now();
                let Some(mut boundary) = next_boundary(now, interval_us) else {
                    log::error!("❌ Next poll boundary after {} is out of range", now);
                    break;
                };

                // sleep may return a hair before the wall clock reaches the
                // boundary; never fire the same boundary twice
                if let Some(previous) = last {
                    if boundary <= previous {
                        boundary = previous + chrono::Duration::microseconds(interval_us);
                    }
                }

                let wait = (boundary - now).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                if token.is_cancelled() {
                    break;
                }

                tick(boundary).await;
                last = Some(boundary);
            }

            log::info!("🛑 Poll scheduler stopped");
        });

        Self {
            interval_secs,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn interval_secs(&self) -> f64 {
        self.interval_secs
    }

    /// Stop scheduling; a tick already running is allowed to finish
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the background task is still alive
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for the background task to exit (call `cancel()` first)
    pub async fn join(&mut self) -> Result<(), JoinError> {
        match self.handle.take() {
            Some(handle) => handle.await,
            None => Ok(()),
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
