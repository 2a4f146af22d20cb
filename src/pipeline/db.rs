//! Aggregate sinks - persistence for finalized history rows
//!
//! After every flush the station hands each sink a read-only snapshot of the
//! history that changed. Sinks are idempotent: persisting the same snapshot
//! twice leaves the store unchanged and reports every row as `unchanged`.

use super::types::{AggregateRow, HistoryKind};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Embedded schema, applied in order
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "01_gamma_aggregates.sql",
        include_str!("../../sql/01_gamma_aggregates.sql"),
    ),
    (
        "02_episode_aggregates.sql",
        include_str!("../../sql/02_episode_aggregates.sql"),
    ),
];

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid timestamp in store: {0:?}")]
    InvalidTimestamp(String),

    #[error("sink lock poisoned")]
    LockPoisoned,
}

/// Per-row upsert decisions for one `persist` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl PersistOutcome {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }

    /// True when the store already held exactly these rows
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0
    }
}

/// Destination for finalized history snapshots
#[async_trait]
pub trait AggregateSink: Send + Sync {
    /// Persist a snapshot of one history (newest first)
    ///
    /// Rows are keyed by `window_start`. Existing rows with identical values
    /// are left alone; rows whose values differ are overwritten.
    async fn persist(
        &self,
        kind: HistoryKind,
        rows: &[AggregateRow],
    ) -> Result<PersistOutcome, SinkError>;

    /// Short label used in log lines
    fn name(&self) -> &str;
}

pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, SinkError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| SinkError::InvalidTimestamp(raw.to_string()))
}

fn table_name(kind: HistoryKind) -> &'static str {
    match kind {
        HistoryKind::Gamma => "gamma_aggregates",
        HistoryKind::Episode => "episode_aggregates",
    }
}

/// Run the embedded schema migrations
///
/// Every migration uses `IF NOT EXISTS`, so running this against an existing
/// database is a no-op.
///
/// Arguments:
/// - `conn`: SQLite connection (mutable reference)
pub fn run_schema_migrations(conn: &mut Connection) -> Result<(), SinkError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::info!("📊 Enabled WAL mode for SQLite database");

    log::info!("🔧 Running {} schema migrations", MIGRATIONS.len());
    for (filename, sql) in MIGRATIONS {
        log::info!("   ├─ Executing: {}", filename);
        conn.execute_batch(sql)?;
        log::info!("   └─ ✅ Success: {}", filename);
    }

    log::info!("✅ All schema migrations completed successfully");
    Ok(())
}

/// SQLite implementation of AggregateSink
pub struct SqliteAggregateSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAggregateSink {
    /// Open (or create) the database and apply the schema
    ///
    /// Arguments:
    /// - `db_path`: Path to SQLite database file
    pub fn new(db_path: &str) -> Result<Self, SinkError> {
        let mut conn = Connection::open(db_path)?;
        run_schema_migrations(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn upsert_rows(&self, kind: HistoryKind, rows: &[AggregateRow]) -> Result<PersistOutcome, SinkError> {
        let mut conn = self.conn.lock().map_err(|_| SinkError::LockPoisoned)?;
        let table = table_name(kind);
        let updated_at = encode_timestamp(&Utc::now());
        let mut outcome = PersistOutcome::default();

        let tx = conn.transaction()?;
        {
            let mut select = tx.prepare(&format!(
                "SELECT window_end, sample_count, mean_flow, error_flow, volume, error_volume
                 FROM {} WHERE window_start = ?",
                table
            ))?;
            let mut upsert = tx.prepare(&format!(
                r#"
                INSERT INTO {} (
                    window_start, window_end, sample_count,
                    mean_flow, error_flow, volume, error_volume, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(window_start) DO UPDATE SET
                    window_end = excluded.window_end,
                    sample_count = excluded.sample_count,
                    mean_flow = excluded.mean_flow,
                    error_flow = excluded.error_flow,
                    volume = excluded.volume,
                    error_volume = excluded.error_volume,
                    updated_at = excluded.updated_at
                "#,
                table
            ))?;

            for row in rows {
                let start = encode_timestamp(&row.window_start);
                let end = encode_timestamp(&row.window_end);

                let existing = select
                    .query_row([&start], |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, i64>(1)?,
                            r.get::<_, f64>(2)?,
                            r.get::<_, f64>(3)?,
                            r.get::<_, f64>(4)?,
                            r.get::<_, f64>(5)?,
                        ))
                    })
                    .optional()?;

                let candidate = (
                    end.clone(),
                    row.count as i64,
                    row.mean_flow,
                    row.error_flow,
                    row.volume,
                    row.error_volume,
                );

                match existing {
                    Some(stored) if stored == candidate => {
                        outcome.unchanged += 1;
                        continue;
                    }
                    Some(_) => outcome.updated += 1,
                    None => outcome.inserted += 1,
                }

                upsert.execute(rusqlite::params![
                    start,
                    end,
                    row.count as i64,
                    row.mean_flow,
                    row.error_flow,
                    row.volume,
                    row.error_volume,
                    updated_at,
                ])?;
            }
        }
        tx.commit()?;

        Ok(outcome)
    }

    /// Load up to `limit` stored rows, newest first
    ///
    /// Used at start-up to re-seed the in-memory histories.
    pub fn load_rows(&self, kind: HistoryKind, limit: usize) -> Result<Vec<AggregateRow>, SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::LockPoisoned)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT window_start, window_end, sample_count, mean_flow, error_flow, volume, error_volume
             FROM {} ORDER BY window_start DESC LIMIT ?",
            table_name(kind)
        ))?;

        let raw = stmt
            .query_map([limit as i64], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, f64>(3)?,
                    r.get::<_, f64>(4)?,
                    r.get::<_, f64>(5)?,
                    r.get::<_, f64>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(start, end, count, mean_flow, error_flow, volume, error_volume)| {
                Ok(AggregateRow {
                    window_start: decode_timestamp(&start)?,
                    window_end: decode_timestamp(&end)?,
                    count: count.max(0) as u64,
                    mean_flow,
                    error_flow,
                    volume,
                    error_volume,
                })
            })
            .collect()
    }

    pub fn count_rows(&self, kind: HistoryKind) -> Result<usize, SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::LockPoisoned)?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table_name(kind)),
            [],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl AggregateSink for SqliteAggregateSink {
    async fn persist(
        &self,
        kind: HistoryKind,
        rows: &[AggregateRow],
    ) -> Result<PersistOutcome, SinkError> {
        let outcome = self.upsert_rows(kind, rows)?;
        log::debug!(
            "💾 {} rows persisted to {}: {:?}",
            rows.len(),
            table_name(kind),
            outcome
        );
        Ok(outcome)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
