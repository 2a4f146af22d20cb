//! Core data types for the acquisition pipeline
//!
//! - `Record` - one parsed poll response from the sampler
//! - `AggregateRow` - one finalized window/episode aggregate
//! - `HistoryKind` - which history a row (or snapshot) belongs to

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pump activity reported by the device
///
/// The instrument encodes the pump state as an integer: 1 = running,
/// 0 = stopped. Anything else is carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityStatus {
    On,
    Off,
    Other(i64),
}

impl ActivityStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ActivityStatus::On,
            0 => ActivityStatus::Off,
            other => ActivityStatus::Other(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            ActivityStatus::On => 1,
            ActivityStatus::Off => 0,
            ActivityStatus::Other(code) => *code,
        }
    }
}

/// One poll response from the instrument
///
/// Produced by a `RecordSource`, consumed by the engine and then dropped
/// (only the latest record is retained for the query surface).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Device clock at the time of the reading
    pub device_clock: DateTime<Utc>,

    /// Start of the current pump run, as reported by the device
    pub episode_start: DateTime<Utc>,

    pub status: ActivityStatus,

    /// Flow rate in m³/h
    pub flow_rate: f64,

    /// Differential pressure across the filter
    pub pressure_diff: f64,

    /// Remaining numeric fields of the line (temperatures, wind, volume counter...)
    #[serde(default)]
    pub extra: BTreeMap<String, f64>,
}

/// Finalized aggregate for one gamma window or one sampling episode
///
/// `window_start` is the row key: histories are ordered by it and sinks
/// upsert on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub count: u64,
    pub mean_flow: f64,
    pub error_flow: f64,
    /// Integrated volume in m³ (`mean_flow / 3600 × seconds`)
    pub volume: f64,
    pub error_volume: f64,
}

impl AggregateRow {
    /// Build a row from accumulator output over a span of `seconds`
    ///
    /// Flow is in m³/h, so volume is `flow / 3600 × seconds`.
    pub fn from_stats(
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        count: u64,
        mean_flow: f64,
        error_flow: f64,
        seconds: f64,
    ) -> Self {
        Self {
            window_start,
            window_end,
            count,
            mean_flow,
            error_flow,
            volume: mean_flow / 3600.0 * seconds,
            error_volume: error_flow / 3600.0 * seconds,
        }
    }
}

/// Which aggregate history a row or snapshot belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryKind {
    /// Fixed-cadence, clock-aligned windows
    Gamma,
    /// Pump-run (filter sample) episodes
    Episode,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Gamma => "gamma",
            HistoryKind::Episode => "episode",
        }
    }

    pub fn all() -> [HistoryKind; 2] {
        [HistoryKind::Gamma, HistoryKind::Episode]
    }
}

/// Read-only view returned by the query surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecentAggregates {
    pub latest: Option<Record>,
    /// Host clock minus device clock at the latest poll, in seconds
    pub clock_skew_seconds: Option<f64>,
    pub gamma_rows: Vec<AggregateRow>,
    pub episode_rows: Vec<AggregateRow>,
}
