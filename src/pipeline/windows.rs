//! Aggregator trait and fixed-cadence (gamma) window implementation
//!
//! A gamma window is a half-open, clock-aligned bucket `[start, start + period)`.
//! The open window is flushed into its `History` the first time a record lands
//! in a different bucket. Only readings taken while the pump runs (status ON)
//! count; OFF and unknown-status readings neither feed nor close a window.

use super::history::History;
use super::stats::RecursiveStats;
use super::types::{ActivityStatus, AggregateRow, HistoryKind, Record};
use chrono::{DateTime, TimeZone, Utc};

/// Trait for an aggregator fed one record per poll
///
/// Implementations own the single open window/episode and the history of
/// rows they have flushed.
pub trait RecordAggregator {
    /// Feed a record; returns the row flushed into history, if any
    fn ingest(&mut self, record: &Record) -> Option<AggregateRow>;

    /// Finalized rows, newest first
    fn history(&self) -> &History;

    /// Mutable history access for restoring persisted rows
    fn history_mut(&mut self) -> &mut History;

    fn kind(&self) -> HistoryKind;
}

/// Convert a period in seconds to whole milliseconds (at least 1)
pub(crate) fn period_millis(period_secs: f64) -> i64 {
    ((period_secs * 1000.0).round() as i64).max(1)
}

/// Bounds of the aligned window containing `t`
///
/// `start = floor(t / period) * period`, `end = start + period`. A timestamp
/// exactly on a boundary belongs to the window that starts there.
pub fn window_bounds(t: DateTime<Utc>, period_ms: i64) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_ms = t.timestamp_millis().div_euclid(period_ms) * period_ms;
    let start = millis_to_utc(start_ms);
    let end = millis_to_utc(start_ms + period_ms);
    (start, end)
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// The single open gamma window
#[derive(Debug, Clone)]
pub struct WindowState {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    accumulator: RecursiveStats,
}

impl WindowState {
    fn open(window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        Self {
            window_start,
            window_end,
            accumulator: RecursiveStats::new(),
        }
    }

    pub fn accumulator(&self) -> &RecursiveStats {
        &self.accumulator
    }
}

/// Fixed-cadence aggregator (hourly by default)
#[derive(Debug, Clone)]
pub struct GammaAggregator {
    period_ms: i64,
    open: Option<WindowState>,
    history: History,
}

impl GammaAggregator {
    pub fn new(period_secs: f64, num_back_data: usize) -> Self {
        Self {
            period_ms: period_millis(period_secs),
            open: None,
            history: History::new(num_back_data),
        }
    }

    fn period_secs(&self) -> f64 {
        self.period_ms as f64 / 1000.0
    }

    pub fn open_window(&self) -> Option<&WindowState> {
        self.open.as_ref()
    }

    /// Provisional row for the open window, as it would be flushed now
    pub fn preview(&self) -> Option<AggregateRow> {
        let window = self.open.as_ref()?;
        let (count, mean, error) = window.accumulator.snapshot();
        if count == 0 {
            return None;
        }
        Some(AggregateRow::from_stats(
            window.window_start,
            window.window_end,
            count,
            mean,
            error,
            self.period_secs(),
        ))
    }
}

impl RecordAggregator for GammaAggregator {
    fn ingest(&mut self, record: &Record) -> Option<AggregateRow> {
        if record.status != ActivityStatus::On {
            return None;
        }

        let (window_start, window_end) = window_bounds(record.device_clock, self.period_ms);
        let mut flushed = None;

        let crossed = match &self.open {
            None => true,
            Some(window) => window.window_end != window_end,
        };

        if crossed {
            if let Some(previous) = self.open.take() {
                let (count, mean, error) = previous.accumulator.snapshot();
                if count > 0 {
                    let row = AggregateRow::from_stats(
                        previous.window_start,
                        previous.window_end,
                        count,
                        mean,
                        error,
                        self.period_secs(),
                    );
                    log::debug!(
                        "gamma window {} -> {} closed ({} samples, mean {:.3})",
                        row.window_start,
                        row.window_end,
                        row.count,
                        row.mean_flow
                    );
                    self.history.insert(row.clone());
                    flushed = Some(row);
                }
            }
            self.open = Some(WindowState::open(window_start, window_end));
        }

        if let Some(window) = self.open.as_mut() {
            window.accumulator.accumulate(record.flow_rate);
        }

        flushed
    }

    fn history(&self) -> &History {
        &self.history
    }

    fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    fn kind(&self) -> HistoryKind {
        HistoryKind::Gamma
    }
}
