//! JSON snapshot sink
//!
//! Keeps one `{kind}_history.json` file per history in a directory. Each
//! persist rewrites the whole snapshot (write to a temp file, then rename) and
//! reports the row-level differences against the previous file.

use super::db::{AggregateSink, PersistOutcome, SinkError};
use super::types::{AggregateRow, HistoryKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Snapshot of one history for persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub kind: HistoryKind,
    pub rows: Vec<AggregateRow>,
    pub saved_at: DateTime<Utc>,
}

pub fn snapshot_path(dir: &Path, kind: HistoryKind) -> PathBuf {
    dir.join(format!("{}_history.json", kind.as_str()))
}

/// Load a history snapshot from `dir`
///
/// A missing file is not an error: it yields an empty history.
pub fn load_snapshot(dir: &Path, kind: HistoryKind) -> Result<Vec<AggregateRow>, SinkError> {
    let path = snapshot_path(dir, kind);
    if !path.exists() {
        log::info!("No existing {} snapshot found: {}", kind.as_str(), path.display());
        return Ok(Vec::new());
    }

    let json = std::fs::read_to_string(&path)?;
    let snapshot: HistorySnapshot = serde_json::from_str(&json)?;

    log::info!("Loaded {} {} rows from {}", snapshot.rows.len(), kind.as_str(), path.display());
    Ok(snapshot.rows)
}

fn diff_rows(previous: &[AggregateRow], rows: &[AggregateRow]) -> PersistOutcome {
    let by_start: HashMap<DateTime<Utc>, &AggregateRow> =
        previous.iter().map(|row| (row.window_start, row)).collect();

    let mut outcome = PersistOutcome::default();
    for row in rows {
        match by_start.get(&row.window_start) {
            Some(stored) if *stored == row => outcome.unchanged += 1,
            Some(_) => outcome.updated += 1,
            None => outcome.inserted += 1,
        }
    }
    outcome
}

pub struct JsonSnapshotSink {
    dir: PathBuf,
}

impl JsonSnapshotSink {
    /// Create the sink, creating `dir` if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl AggregateSink for JsonSnapshotSink {
    async fn persist(
        &self,
        kind: HistoryKind,
        rows: &[AggregateRow],
    ) -> Result<PersistOutcome, SinkError> {
        let path = snapshot_path(&self.dir, kind);

        let previous = match tokio::fs::read_to_string(&path).await {
            Ok(json) => match serde_json::from_str::<HistorySnapshot>(&json) {
                Ok(snapshot) => snapshot.rows,
                Err(e) => {
                    log::warn!("⚠️  Ignoring unreadable snapshot {}: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let outcome = diff_rows(&previous, rows);
        if outcome.is_noop() && previous.len() == rows.len() {
            return Ok(outcome);
        }

        let snapshot = HistorySnapshot {
            kind,
            rows: rows.to_vec(),
            saved_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        log::debug!("Saved {} {} rows to {}", rows.len(), kind.as_str(), path.display());
        Ok(outcome)
    }

    fn name(&self) -> &str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_row(minute: u32, mean_flow: f64) -> AggregateRow {
        AggregateRow::from_stats(
            Utc.with_ymd_and_hms(2024, 9, 2, 6, minute, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 9, 2, 6, minute + 10, 0).unwrap(),
            30,
            mean_flow,
            0.1,
            600.0,
        )
    }

    #[tokio::test]
    async fn test_persist_and_load_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonSnapshotSink::new(dir.path()).unwrap();
        let rows = vec![make_row(20, 5.5), make_row(0, 4.0)];

        let outcome = sink.persist(HistoryKind::Episode, &rows).await.unwrap();
        assert_eq!(outcome.inserted, 2);

        let loaded = load_snapshot(dir.path(), HistoryKind::Episode).unwrap();
        assert_eq!(loaded, rows);
        assert!(load_snapshot(dir.path(), HistoryKind::Gamma).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_outcome_against_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonSnapshotSink::new(dir.path()).unwrap();
        sink.persist(HistoryKind::Gamma, &[make_row(0, 1.0)]).await.unwrap();

        let same = sink.persist(HistoryKind::Gamma, &[make_row(0, 1.0)]).await.unwrap();
        assert_eq!(same, PersistOutcome { inserted: 0, updated: 0, unchanged: 1 });

        let changed = sink
            .persist(HistoryKind::Gamma, &[make_row(30, 3.0), make_row(0, 2.0)])
            .await
            .unwrap();
        assert_eq!(changed, PersistOutcome { inserted: 1, updated: 1, unchanged: 0 });
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error_on_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(snapshot_path(dir.path(), HistoryKind::Gamma), "{ not json").unwrap();
        assert!(matches!(
            load_snapshot(dir.path(), HistoryKind::Gamma),
            Err(SinkError::Serialization(_))
        ));
    }
}
