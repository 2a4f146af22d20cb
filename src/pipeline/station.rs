//! Station - tick orchestration around the shared engine
//!
//! One tick = poll → aggregate → persist:
//! 1. Poll the record source on the blocking pool (engine unlocked)
//! 2. Lock the engine ONCE, feed both aggregators, snapshot changed histories
//! 3. Release the lock BEFORE handing snapshots to the sinks
//!
//! A failed poll aborts the tick before the engine is touched, so readers
//! never observe a partial update.

use super::acquisition::{Acquisition, Reading};
use super::db::{AggregateSink, PersistOutcome};
use super::engine::{IngestOutcome, PipelineEngine};
use super::scheduler::PollScheduler;
use super::types::{AggregateRow, HistoryKind, RecentAggregates};
use crate::source::SourceError;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StationError {
    #[error("poll failed: {0}")]
    Source(#[from] SourceError),

    #[error("station lock poisoned")]
    LockPoisoned,

    #[error("poll task failed: {0}")]
    PollTask(String),
}

/// Result of persisting one snapshot to one sink
#[derive(Debug, Clone, PartialEq)]
pub struct SinkReport {
    pub sink: String,
    pub kind: HistoryKind,
    pub outcome: PersistOutcome,
}

/// What a successful tick did
#[derive(Debug, Clone)]
pub struct TickReport {
    pub boundary: DateTime<Utc>,
    pub reading: Reading,
    pub flushed: IngestOutcome,
    pub persisted: Vec<SinkReport>,
    /// Sink calls that failed (already logged)
    pub sink_failures: usize,
}

pub struct Station {
    engine: Arc<Mutex<PipelineEngine>>,
    acquisition: Arc<Mutex<Acquisition>>,
    sinks: Vec<Arc<dyn AggregateSink>>,
    poll_interval_secs: f64,
    /// Held for a whole tick so concurrent callers run one after another
    tick_gate: tokio::sync::Mutex<()>,
}

impl Station {
    pub fn new(
        engine: PipelineEngine,
        acquisition: Acquisition,
        sinks: Vec<Arc<dyn AggregateSink>>,
    ) -> Self {
        let poll_interval_secs = engine.config().poll_interval_seconds();
        Self {
            engine: Arc::new(Mutex::new(engine)),
            acquisition: Arc::new(Mutex::new(acquisition)),
            sinks,
            poll_interval_secs,
            tick_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn poll_interval_secs(&self) -> f64 {
        self.poll_interval_secs
    }

    fn poll_blocking(&self) -> impl std::future::Future<Output = Result<Reading, StationError>> {
        let acquisition = Arc::clone(&self.acquisition);
        async move {
            tokio::task::spawn_blocking(move || {
                let mut acquisition = acquisition.lock().map_err(|_| StationError::LockPoisoned)?;
                acquisition.poll().map_err(StationError::from)
            })
            .await
            .map_err(|e| StationError::PollTask(e.to_string()))?
        }
    }

    /// Mutate step: the only place the engine is written
    fn apply(
        &self,
        reading: Reading,
    ) -> Result<(IngestOutcome, Vec<(HistoryKind, Vec<AggregateRow>)>), StationError> {
        let mut engine = self.engine.lock().map_err(|_| StationError::LockPoisoned)?;
        let flushed = engine.ingest(reading);
        let snapshots = flushed
            .changed_kinds()
            .into_iter()
            .map(|kind| (kind, engine.snapshot(kind)))
            .collect();
        Ok((flushed, snapshots))
    }

    /// Run one poll → aggregate → persist cycle
    ///
    /// Arguments:
    /// - `boundary`: The scheduled instant this tick was aimed at
    ///
    /// Sink failures are logged and counted; they never undo the aggregate
    /// update (the next flush persists the whole snapshot again).
    ///
    /// Ticks are serialized: a second caller waits until the running tick has
    /// persisted, so sinks always receive snapshots in flush order.
    pub async fn tick(&self, boundary: DateTime<Utc>) -> Result<TickReport, StationError> {
        let _turn = self.tick_gate.lock().await;

        // 1. Poll (engine unlocked)
        let reading = self.poll_blocking().await?;

        let skew = reading.clock_skew_seconds();
        if skew.abs() > self.poll_interval_secs {
            log::warn!("⚠️  Device clock is {:.1}s off host clock", skew);
        }
        log::debug!(
            "tick {}: flow {:.3} status {:?} skew {:.1}s",
            boundary,
            reading.record.flow_rate,
            reading.record.status,
            skew
        );

        // 2. Aggregate under the lock
        let (flushed, snapshots) = self.apply(reading.clone())?;

        // 3. Persist (engine unlocked)
        let mut persisted = Vec::new();
        let mut sink_failures = 0;
        for (kind, rows) in &snapshots {
            for sink in &self.sinks {
                match sink.persist(*kind, rows).await {
                    Ok(outcome) => persisted.push(SinkReport {
                        sink: sink.name().to_string(),
                        kind: *kind,
                        outcome,
                    }),
                    Err(e) => {
                        sink_failures += 1;
                        log::error!(
                            "❌ Failed to persist {} history to {}: {}",
                            kind.as_str(),
                            sink.name(),
                            e
                        );
                    }
                }
            }
        }

        if let Some(row) = &flushed.gamma {
            log::info!(
                "📦 Gamma window {} → {} closed: n={} mean={:.3} volume={:.3}",
                row.window_start,
                row.window_end,
                row.count,
                row.mean_flow,
                row.volume
            );
        }
        if let Some(row) = &flushed.episode {
            log::info!(
                "📦 Episode {} → {} closed: n={} mean={:.3} volume={:.3}",
                row.window_start,
                row.window_end,
                row.count,
                row.mean_flow,
                row.volume
            );
        }

        Ok(TickReport {
            boundary,
            reading,
            flushed,
            persisted,
            sink_failures,
        })
    }

    /// Latest record plus up to `n` newest rows of each history
    pub fn recent(&self, n: usize) -> Result<RecentAggregates, StationError> {
        let engine = self.engine.lock().map_err(|_| StationError::LockPoisoned)?;
        Ok(engine.recent(n))
    }

    pub fn snapshot(&self, kind: HistoryKind) -> Result<Vec<AggregateRow>, StationError> {
        let engine = self.engine.lock().map_err(|_| StationError::LockPoisoned)?;
        Ok(engine.snapshot(kind))
    }

    pub fn preview(&self, kind: HistoryKind) -> Result<Option<AggregateRow>, StationError> {
        let engine = self.engine.lock().map_err(|_| StationError::LockPoisoned)?;
        Ok(engine.preview(kind))
    }

    /// Re-seed a history from persisted rows
    pub fn restore(&self, kind: HistoryKind, rows: Vec<AggregateRow>) -> Result<usize, StationError> {
        let mut engine = self.engine.lock().map_err(|_| StationError::LockPoisoned)?;
        Ok(engine.restore(kind, rows))
    }

    /// Start the aligned poll loop driving `tick`
    pub fn start_polling(self: &Arc<Self>) -> PollScheduler {
        let station = Arc::clone(self);
        PollScheduler::start(self.poll_interval_secs, move |boundary| {
            let station = Arc::clone(&station);
            async move {
                match station.tick(boundary).await {
                    Ok(report) => {
                        if report.sink_failures > 0 {
                            log::warn!(
                                "⚠️  Tick at {} kept aggregates but {} sink writes failed",
                                boundary,
                                report.sink_failures
                            );
                        }
                    }
                    Err(StationError::Source(e)) => {
                        log::warn!("⚠️  Skipping tick at {}: {}", boundary, e);
                    }
                    Err(e) => {
                        log::error!("❌ Tick at {} failed: {}", boundary, e);
                    }
                }
            }
        })
    }

    /// Stop `scheduler` and start a fresh poll loop
    pub async fn restart_polling(self: &Arc<Self>, mut scheduler: PollScheduler) -> PollScheduler {
        log::info!("🔄 Restarting poll loop (was every {}s)", scheduler.interval_secs());
        scheduler.cancel();
        if let Err(e) = scheduler.join().await {
            log::error!("❌ Poll loop ended abnormally: {}", e);
        }
        self.start_polling()
    }

    /// Cancel polling, wait for the in-flight tick, then close the source
    pub async fn shutdown(&self, mut scheduler: PollScheduler) -> Result<(), StationError> {
        scheduler.cancel();
        scheduler
            .join()
            .await
            .map_err(|e| StationError::PollTask(e.to_string()))?;

        let mut acquisition = self.acquisition.lock().map_err(|_| StationError::LockPoisoned)?;
        acquisition.close();
        Ok(())
    }
}
