//! Pump-run (filter sample) episode aggregator
//!
//! An episode is the run of ON records that share one device-reported start
//! timestamp. It is flushed into history on the first OFF record after it.

use super::history::History;
use super::stats::RecursiveStats;
use super::types::{ActivityStatus, AggregateRow, HistoryKind, Record};
use super::windows::RecordAggregator;
use chrono::{DateTime, Utc};

/// The tracked episode
#[derive(Debug, Clone)]
pub struct EpisodeState {
    /// Device-reported start of the pump run
    pub episode_key: DateTime<Utc>,
    /// Device clock of the latest ON record
    pub last_seen: DateTime<Utc>,
    accumulator: RecursiveStats,
    flushed: bool,
}

impl EpisodeState {
    pub fn accumulator(&self) -> &RecursiveStats {
        &self.accumulator
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    fn duration_secs(&self) -> f64 {
        (self.last_seen - self.episode_key).num_milliseconds() as f64 / 1000.0
    }

    fn to_row(&self) -> AggregateRow {
        let (count, mean, error) = self.accumulator.snapshot();
        AggregateRow::from_stats(
            self.episode_key,
            self.last_seen,
            count,
            mean,
            error,
            self.duration_secs(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct EpisodeAggregator {
    current: Option<EpisodeState>,
    history: History,
}

impl EpisodeAggregator {
    pub fn new(num_back_data: usize) -> Self {
        Self {
            current: None,
            history: History::new(num_back_data),
        }
    }

    /// Tracked episode, flushed or not
    pub fn current(&self) -> Option<&EpisodeState> {
        self.current.as_ref()
    }

    /// Provisional row for an episode still running
    pub fn preview(&self) -> Option<AggregateRow> {
        self.current
            .as_ref()
            .filter(|episode| !episode.flushed && episode.accumulator.count() > 0)
            .map(EpisodeState::to_row)
    }

    fn on_active(&mut self, record: &Record) {
        let same_episode = matches!(
            &self.current,
            Some(episode) if episode.episode_key == record.episode_start
        );

        if !same_episode {
            if let Some(previous) = &self.current {
                if !previous.flushed {
                    log::warn!(
                        "episode started at {} replaced by {} without an OFF reading; {} samples discarded",
                        previous.episode_key,
                        record.episode_start,
                        previous.accumulator.count()
                    );
                }
            }
            self.current = Some(EpisodeState {
                episode_key: record.episode_start,
                last_seen: record.device_clock,
                accumulator: RecursiveStats::new(),
                flushed: false,
            });
        }

        if let Some(episode) = self.current.as_mut() {
            episode.last_seen = record.device_clock;
            episode.accumulator.accumulate(record.flow_rate);
        }
    }

    fn on_stopped(&mut self) -> Option<AggregateRow> {
        let episode = self.current.as_mut()?;
        if episode.flushed || episode.accumulator.count() == 0 {
            return None;
        }

        let row = episode.to_row();
        episode.flushed = true;

        log::debug!(
            "episode {} -> {} closed ({} samples, {:.3} m³)",
            row.window_start,
            row.window_end,
            row.count,
            row.volume
        );
        self.history.insert(row.clone());
        Some(row)
    }
}

impl RecordAggregator for EpisodeAggregator {
    fn ingest(&mut self, record: &Record) -> Option<AggregateRow> {
        match record.status {
            ActivityStatus::On => {
                self.on_active(record);
                None
            }
            ActivityStatus::Off => self.on_stopped(),
            ActivityStatus::Other(_) => None,
        }
    }

    fn history(&self) -> &History {
        &self.history
    }

    fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    fn kind(&self) -> HistoryKind {
        HistoryKind::Episode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 20, 9, 0, 0).unwrap()
    }

    fn make_record(status: ActivityStatus, start: DateTime<Utc>, offset_s: i64, flow: f64) -> Record {
        Record {
            device_clock: t0() + Duration::seconds(offset_s),
            episode_start: start,
            status,
            flow_rate: flow,
            pressure_diff: 0.0,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_two_on_then_off_flushes_one_row() {
        // Test: ON(T0, 5), ON(T0, 7), OFF -> count 2, mean 6
        let mut episodes = EpisodeAggregator::new(10);

        assert!(episodes.ingest(&make_record(ActivityStatus::On, t0(), 20, 5.0)).is_none());
        assert!(episodes.ingest(&make_record(ActivityStatus::On, t0(), 40, 7.0)).is_none());
        let row = episodes
            .ingest(&make_record(ActivityStatus::Off, t0(), 60, 0.0))
            .expect("OFF flushes the episode");

        assert_eq!(row.count, 2);
        assert!((row.mean_flow - 6.0).abs() < 1e-12);
        assert_eq!(row.window_start, t0());
        assert_eq!(row.window_end, t0() + Duration::seconds(40));
        assert!((row.volume - 6.0 / 3600.0 * 40.0).abs() < 1e-12);
        assert_eq!(episodes.history().len(), 1);
    }

    #[test]
    fn test_count_matches_on_records_and_duration() {
        let mut episodes = EpisodeAggregator::new(10);
        let n = 45;
        for i in 0..n {
            episodes.ingest(&make_record(ActivityStatus::On, t0(), 20 * (i + 1), 60.0));
        }
        let row = episodes
            .ingest(&make_record(ActivityStatus::Off, t0(), 20 * (n + 1), 0.0))
            .unwrap();

        assert_eq!(row.count, n as u64);
        assert_eq!(row.window_end - row.window_start, Duration::seconds(20 * n));
    }

    #[test]
    fn test_repeated_off_does_not_flush_twice() {
        let mut episodes = EpisodeAggregator::new(10);
        episodes.ingest(&make_record(ActivityStatus::On, t0(), 20, 5.0));

        assert!(episodes.ingest(&make_record(ActivityStatus::Off, t0(), 40, 0.0)).is_some());
        assert!(episodes.ingest(&make_record(ActivityStatus::Off, t0(), 60, 0.0)).is_none());
        assert_eq!(episodes.history().len(), 1);
        assert!(episodes.preview().is_none());
    }

    #[test]
    fn test_off_without_episode_is_ignored() {
        let mut episodes = EpisodeAggregator::new(10);
        assert!(episodes.ingest(&make_record(ActivityStatus::Off, t0(), 0, 0.0)).is_none());
        assert!(episodes.current().is_none());
        assert!(episodes.history().is_empty());
    }

    #[test]
    fn test_new_start_without_off_resets_without_flush() {
        // Test: a start change while ON discards the old run, nothing is flushed
        let mut episodes = EpisodeAggregator::new(10);
        let t1 = t0() + Duration::hours(2);

        episodes.ingest(&make_record(ActivityStatus::On, t0(), 20, 5.0));
        episodes.ingest(&make_record(ActivityStatus::On, t0(), 40, 5.0));
        assert!(episodes.ingest(&make_record(ActivityStatus::On, t1, 7200, 9.0)).is_none());

        assert!(episodes.history().is_empty());
        let current = episodes.current().unwrap();
        assert_eq!(current.episode_key, t1);
        assert_eq!(current.accumulator().snapshot(), (1, 9.0, 0.0));

        let row = episodes
            .ingest(&make_record(ActivityStatus::Off, t1, 7220, 0.0))
            .unwrap();
        assert_eq!(row.count, 1);
        assert_eq!(row.window_start, t1);
    }

    #[test]
    fn test_other_status_is_ignored() {
        let mut episodes = EpisodeAggregator::new(10);
        episodes.ingest(&make_record(ActivityStatus::On, t0(), 20, 5.0));
        assert!(episodes
            .ingest(&make_record(ActivityStatus::Other(3), t0(), 40, 100.0))
            .is_none());

        assert_eq!(episodes.preview().unwrap().count, 1);
    }
}
