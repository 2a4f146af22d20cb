//! Pipeline Engine - owns all aggregate state
//!
//! The engine holds both aggregators (gamma windows and pump episodes), their
//! histories and the latest reading. It is never shared directly: the
//! `Station` keeps it behind a single mutex and only hands out owned copies.
//!
//! ```text
//! Reading
//!     ↓
//! PipelineEngine::ingest()
//!     ├─ GammaAggregator   → gamma History
//!     └─ EpisodeAggregator → episode History
//!     ↓
//! IngestOutcome (rows flushed this tick)
//! ```

use super::acquisition::Reading;
use super::config::EngineConfig;
use super::episode::EpisodeAggregator;
use super::types::{AggregateRow, HistoryKind, Record, RecentAggregates};
use super::windows::{GammaAggregator, RecordAggregator};
use chrono::Duration;

/// Rows flushed by a single `ingest()`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestOutcome {
    pub gamma: Option<AggregateRow>,
    pub episode: Option<AggregateRow>,
}

impl IngestOutcome {
    /// History kinds that changed during this ingest
    pub fn changed_kinds(&self) -> Vec<HistoryKind> {
        let mut kinds = Vec::new();
        if self.gamma.is_some() {
            kinds.push(HistoryKind::Gamma);
        }
        if self.episode.is_some() {
            kinds.push(HistoryKind::Episode);
        }
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.gamma.is_none() && self.episode.is_none()
    }
}

pub struct PipelineEngine {
    config: EngineConfig,
    gamma: GammaAggregator,
    episodes: EpisodeAggregator,
    latest: Option<Record>,
    latest_skew: Option<Duration>,
    ingested: u64,
}

impl PipelineEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            gamma: GammaAggregator::new(config.gamma_period_seconds(), config.num_back_data()),
            episodes: EpisodeAggregator::new(config.num_back_data()),
            config,
            latest: None,
            latest_skew: None,
            ingested: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Feed one reading through both aggregators
    ///
    /// Neither aggregator can fail, so the update is all-or-nothing as long
    /// as the caller holds the engine lock for the whole call.
    pub fn ingest(&mut self, reading: Reading) -> IngestOutcome {
        let Reading { record, clock_skew } = reading;

        let outcome = IngestOutcome {
            gamma: self.gamma.ingest(&record),
            episode: self.episodes.ingest(&record),
        };

        self.latest = Some(record);
        self.latest_skew = Some(clock_skew);
        self.ingested += 1;
        outcome
    }

    fn aggregator(&self, kind: HistoryKind) -> &dyn RecordAggregator {
        match kind {
            HistoryKind::Gamma => &self.gamma,
            HistoryKind::Episode => &self.episodes,
        }
    }

    /// Owned copy of a whole history, newest first
    pub fn snapshot(&self, kind: HistoryKind) -> Vec<AggregateRow> {
        self.aggregator(kind).history().rows().to_vec()
    }

    /// Re-seed a history from persisted rows; returns the retained row count
    pub fn restore(&mut self, kind: HistoryKind, rows: Vec<AggregateRow>) -> usize {
        let aggregator: &mut dyn RecordAggregator = match kind {
            HistoryKind::Gamma => &mut self.gamma,
            HistoryKind::Episode => &mut self.episodes,
        };
        aggregator.history_mut().restore(rows);

        let history = aggregator.history();
        log::debug!(
            "restored {} history: {}/{} rows",
            aggregator.kind().as_str(),
            history.len(),
            history.capacity()
        );
        history.len()
    }

    /// Latest record plus up to `n` newest rows of each history
    pub fn recent(&self, n: usize) -> RecentAggregates {
        RecentAggregates {
            latest: self.latest.clone(),
            clock_skew_seconds: self
                .latest_skew
                .map(|skew| skew.num_milliseconds() as f64 / 1000.0),
            gamma_rows: self.gamma.history().recent(n),
            episode_rows: self.episodes.history().recent(n),
        }
    }

    /// Provisional row of the window/episode still open
    pub fn preview(&self, kind: HistoryKind) -> Option<AggregateRow> {
        match kind {
            HistoryKind::Gamma => self.gamma.preview(),
            HistoryKind::Episode => self.episodes.preview(),
        }
    }

    pub fn ingested(&self) -> u64 {
        self.ingested
    }
}
