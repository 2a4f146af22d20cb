//! Integration tests for the sampler pipeline
//!
//! Tests drive a `Station` with a scripted record source and real sinks,
//! validating the poll → aggregate → persist flow end to end.
//!
//! Key integration points tested:
//! - Gamma and episode flushes reach both sinks
//! - Failed polls leave the query surface untouched
//! - `recent(n)` never returns more than `n` rows per history
//! - Histories survive a restart through the SQLite store
//! - The aligned scheduler drives ticks until shutdown

#[cfg(test)]
mod pipeline_integration_tests {
    use chrono::{DateTime, TimeZone, Utc};
    use flowsampler::pipeline::{
        load_snapshot, Acquisition, ActivityStatus, AggregateSink, EngineConfig, HistoryKind,
        JsonSnapshotSink, PersistOutcome, PipelineEngine, Record, SqliteAggregateSink, Station,
        StationError,
    };
    use flowsampler::source::{RecordSource, SourceError};
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Arc;
    use tempfile::{tempdir, NamedTempFile};

    struct ScriptedSource {
        script: VecDeque<Result<Record, SourceError>>,
    }

    impl RecordSource for ScriptedSource {
        fn poll(&mut self) -> Result<Record, SourceError> {
            self.script.pop_front().unwrap_or(Err(SourceError::TransportClosed))
        }
    }

    /// Answers every poll with a fresh ON record stamped with the host clock
    struct LiveSource;

    impl RecordSource for LiveSource {
        fn poll(&mut self) -> Result<Record, SourceError> {
            let now = Utc::now();
            Ok(record(now, now, ActivityStatus::On, 42.0))
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 20, h, m, s).unwrap()
    }

    fn record(t: DateTime<Utc>, start: DateTime<Utc>, status: ActivityStatus, flow: f64) -> Record {
        Record {
            device_clock: t,
            episode_start: start,
            status,
            flow_rate: flow,
            pressure_diff: 120.0,
            extra: BTreeMap::new(),
        }
    }

    fn build_station(
        script: Vec<Result<Record, SourceError>>,
        num_back_data: usize,
        sinks: Vec<Arc<dyn AggregateSink>>,
    ) -> Station {
        let engine = PipelineEngine::new(EngineConfig::new(20.0, 3600.0, num_back_data).unwrap());
        let source = Box::new(ScriptedSource { script: script.into() });
        Station::new(engine, Acquisition::new(source), sinks)
    }

    #[tokio::test]
    async fn test_hourly_flush_reaches_both_sinks() {
        // Test: 12:00 (10) and 12:30 (20) share a window; 13:00:05 (30) flushes it
        let db_file = NamedTempFile::new().unwrap();
        let snapshot_dir = tempdir().unwrap();
        let sqlite = Arc::new(SqliteAggregateSink::new(db_file.path().to_str().unwrap()).unwrap());
        let json = Arc::new(JsonSnapshotSink::new(snapshot_dir.path()).unwrap());

        let sinks: Vec<Arc<dyn AggregateSink>> = vec![sqlite.clone(), json.clone()];
        let start = at(11, 59, 0);
        let station = build_station(
            vec![
                Ok(record(at(12, 0, 0), start, ActivityStatus::On, 10.0)),
                Ok(record(at(12, 30, 0), start, ActivityStatus::On, 20.0)),
                Ok(record(at(13, 0, 5), start, ActivityStatus::On, 30.0)),
                Ok(record(at(13, 0, 25), start, ActivityStatus::Off, 0.0)),
            ],
            10,
            sinks,
        );

        assert!(station.tick(at(12, 0, 0)).await.unwrap().flushed.is_empty());
        assert!(station.tick(at(12, 30, 0)).await.unwrap().flushed.is_empty());

        let crossing = station.tick(at(13, 0, 0)).await.unwrap();
        assert!(crossing.flushed.episode.is_none());
        let gamma = crossing.flushed.gamma.clone().unwrap();
        assert_eq!(gamma.window_start, at(12, 0, 0));
        assert_eq!(gamma.window_end, at(13, 0, 0));
        assert_eq!(gamma.count, 2);
        assert!((gamma.mean_flow - 15.0).abs() < 1e-12);
        assert!((gamma.volume - 15.0).abs() < 1e-12);

        // One changed history × two sinks, freshly inserted
        assert_eq!(crossing.sink_failures, 0);
        assert_eq!(crossing.persisted.len(), 2);
        for sink_report in &crossing.persisted {
            assert_eq!(sink_report.kind, HistoryKind::Gamma);
            assert_eq!(sink_report.outcome, PersistOutcome { inserted: 1, updated: 0, unchanged: 0 });
        }

        // The pump stopping closes the episode; the stop reading is not sampled
        let stop = station.tick(at(13, 0, 20)).await.unwrap();
        assert!(stop.flushed.gamma.is_none());
        let episode = stop.flushed.episode.clone().unwrap();
        assert_eq!(episode.window_start, start);
        assert_eq!(episode.window_end, at(13, 0, 5));
        assert_eq!(episode.count, 3);
        assert!((episode.mean_flow - 20.0).abs() < 1e-12);
        assert_eq!(stop.persisted.len(), 2);
        for sink_report in &stop.persisted {
            assert_eq!(sink_report.kind, HistoryKind::Episode);
        }

        assert_eq!(sqlite.load_rows(HistoryKind::Gamma, 10).unwrap(), vec![gamma.clone()]);
        assert_eq!(load_snapshot(snapshot_dir.path(), HistoryKind::Episode).unwrap(), vec![episode]);

        // The new window holds only the running-pump reading that opened it
        let open = station.preview(HistoryKind::Gamma).unwrap().unwrap();
        assert_eq!(open.window_start, at(13, 0, 0));
        assert_eq!(open.count, 1);
        assert_eq!(open.mean_flow, 30.0);
    }

    #[tokio::test]
    async fn test_malformed_line_skips_tick() {
        let start = at(8, 0, 0);
        let station = build_station(
            vec![
                Ok(record(at(8, 10, 0), start, ActivityStatus::On, 3.0)),
                Err(SourceError::MalformedLine("missing end delimiter".to_string())),
                Ok(record(at(8, 11, 0), start, ActivityStatus::On, 5.0)),
            ],
            10,
            Vec::new(),
        );

        station.tick(at(8, 10, 0)).await.unwrap();
        let before = station.recent(10).unwrap();

        let skipped = station.tick(at(8, 10, 20)).await;
        assert!(matches!(skipped, Err(StationError::Source(SourceError::MalformedLine(_)))));
        assert_eq!(station.recent(10).unwrap(), before);
        assert_eq!(station.preview(HistoryKind::Gamma).unwrap().unwrap().count, 1);

        // Scheduling resumes normally on the next tick
        station.tick(at(8, 11, 0)).await.unwrap();
        let open = station.preview(HistoryKind::Gamma).unwrap().unwrap();
        assert_eq!(open.count, 2);
        assert_eq!(open.mean_flow, 4.0);
    }

    #[tokio::test]
    async fn test_recent_never_exceeds_n() {
        let start = at(0, 0, 0);
        let script = (0..7)
            .map(|h| Ok(record(at(h, 15, 0), start, ActivityStatus::On, h as f64)))
            .collect();
        let station = build_station(script, 4, Vec::new());

        for h in 0..7 {
            station.tick(at(h, 15, 0)).await.unwrap();
        }

        // 7 hours → 6 flushed windows, capped at 4 retained
        assert_eq!(station.snapshot(HistoryKind::Gamma).unwrap().len(), 4);

        let recent = station.recent(3).unwrap();
        assert_eq!(recent.gamma_rows.len(), 3);
        assert!(recent.episode_rows.is_empty());
        assert_eq!(recent.gamma_rows[0].window_start, at(5, 0, 0));
        for pair in recent.gamma_rows.windows(2) {
            assert!(pair[0].window_start > pair[1].window_start);
        }
        assert_eq!(recent.latest.unwrap().device_clock, at(6, 15, 0));

        assert!(station.recent(0).unwrap().gamma_rows.is_empty());
    }

    #[tokio::test]
    async fn test_history_survives_restart_via_sqlite() {
        let db_file = NamedTempFile::new().unwrap();
        let db_path = db_file.path().to_str().unwrap().to_string();
        let start = at(0, 0, 0);

        {
            let sqlite: Arc<dyn AggregateSink> = Arc::new(SqliteAggregateSink::new(&db_path).unwrap());
            let script = (0..4)
                .map(|h| Ok(record(at(h, 30, 0), start, ActivityStatus::On, 10.0 + h as f64)))
                .collect();
            let station = build_station(script, 10, vec![sqlite]);
            for h in 0..4 {
                station.tick(at(h, 30, 0)).await.unwrap();
            }
            assert_eq!(station.snapshot(HistoryKind::Gamma).unwrap().len(), 3);
        }

        let sqlite = SqliteAggregateSink::new(&db_path).unwrap();
        let rows = sqlite.load_rows(HistoryKind::Gamma, 2).unwrap();
        let restarted = build_station(Vec::new(), 2, Vec::new());
        assert_eq!(restarted.restore(HistoryKind::Gamma, rows).unwrap(), 2);

        let recent = restarted.recent(10).unwrap();
        assert_eq!(recent.gamma_rows.len(), 2);
        assert_eq!(recent.gamma_rows[0].window_start, at(2, 0, 0));
        assert_eq!(recent.gamma_rows[0].mean_flow, 12.0);
        assert!(recent.latest.is_none());
    }

    #[tokio::test]
    async fn test_scheduler_drives_station_until_shutdown() {
        let engine = PipelineEngine::new(EngineConfig::new(0.05, 3600.0, 10).unwrap());
        let station = Arc::new(Station::new(engine, Acquisition::new(Box::new(LiveSource)), Vec::new()));

        let scheduler = station.start_polling();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        station.shutdown(scheduler).await.unwrap();

        let recent = station.recent(5).unwrap();
        let latest = recent.latest.expect("at least one tick should have run");
        assert_eq!(latest.flow_rate, 42.0);
        assert!(recent.clock_skew_seconds.unwrap().abs() < 1.0);
    }
}
