//! Bounded history of finalized aggregate rows
//!
//! Rows are kept sorted by `window_start` descending (newest first). When the
//! history grows past its capacity the row with the smallest start is evicted.

use super::types::AggregateRow;

/// What happened to a row passed to `History::insert`
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// New row stored, nothing evicted
    Inserted,
    /// A row with the same start already existed and was overwritten
    Replaced,
    /// New row stored and the oldest row dropped to stay within capacity.
    /// The evicted row is the new one itself when it was older than everything retained.
    Evicted(AggregateRow),
}

#[derive(Debug, Clone)]
pub struct History {
    rows: Vec<AggregateRow>,
    capacity: usize,
}

impl History {
    /// Create an empty history holding at most `capacity` rows
    ///
    /// A capacity of 0 is bumped to 1; `EngineConfig` rejects it before it gets here.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            rows: Vec::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn insert(&mut self, row: AggregateRow) -> InsertOutcome {
        // Newest first: find the first row that starts before this one
        match self
            .rows
            .binary_search_by(|existing| row.window_start.cmp(&existing.window_start))
        {
            Ok(idx) => {
                self.rows[idx] = row;
                InsertOutcome::Replaced
            }
            Err(idx) => {
                self.rows.insert(idx, row);
                if self.rows.len() > self.capacity {
                    match self.rows.pop() {
                        Some(evicted) => InsertOutcome::Evicted(evicted),
                        None => InsertOutcome::Inserted,
                    }
                } else {
                    InsertOutcome::Inserted
                }
            }
        }
    }

    /// Re-seed from previously persisted rows (any order)
    pub fn restore(&mut self, rows: impl IntoIterator<Item = AggregateRow>) {
        for row in rows {
            self.insert(row);
        }
    }

    /// Up to `n` newest rows
    pub fn recent(&self, n: usize) -> Vec<AggregateRow> {
        self.rows.iter().take(n).cloned().collect()
    }

    pub fn rows(&self) -> &[AggregateRow] {
        &self.rows
    }

    pub fn contains_start(&self, start: &chrono::DateTime<chrono::Utc>) -> bool {
        self.rows
            .binary_search_by(|existing| start.cmp(&existing.window_start))
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn row_at(hour: i64, mean: f64) -> AggregateRow {
        let start = base() + Duration::hours(hour);
        AggregateRow::from_stats(start, start + Duration::hours(1), 1, mean, 0.0, 3600.0)
    }

    #[test]
    fn test_rows_sorted_newest_first() {
        let mut history = History::new(10);
        history.insert(row_at(2, 1.0));
        history.insert(row_at(0, 1.0));
        history.insert(row_at(5, 1.0));
        history.insert(row_at(3, 1.0));

        let starts: Vec<_> = history.rows().iter().map(|r| r.window_start).collect();
        let mut expected = starts.clone();
        expected.sort_by(|a, b| b.cmp(a));
        assert_eq!(starts, expected);
        assert_eq!(history.rows()[0].window_start, base() + Duration::hours(5));
    }

    #[test]
    fn test_capacity_plus_one_evicts_smallest_start() {
        // Test: numBackData + 1 inserts keep the numBackData largest starts
        let capacity = 4;
        let mut history = History::new(capacity);
        assert_eq!(history.capacity(), capacity);
        assert_eq!(History::new(0).capacity(), 1);
        for hour in [3, 1, 4, 0] {
            assert_eq!(history.insert(row_at(hour, 1.0)), InsertOutcome::Inserted);
        }

        let outcome = history.insert(row_at(2, 1.0));
        assert_eq!(outcome, InsertOutcome::Evicted(row_at(0, 1.0)));
        assert_eq!(history.len(), capacity);
        assert!(!history.contains_start(&base()));
        for hour in 1..=4 {
            assert!(history.contains_start(&(base() + Duration::hours(hour))));
        }
    }

    #[test]
    fn test_older_than_everything_is_dropped_when_full() {
        let mut history = History::new(2);
        history.insert(row_at(5, 1.0));
        history.insert(row_at(6, 1.0));

        let outcome = history.insert(row_at(1, 1.0));
        assert_eq!(outcome, InsertOutcome::Evicted(row_at(1, 1.0)));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_same_start_replaces() {
        let mut history = History::new(3);
        history.insert(row_at(1, 10.0));
        assert_eq!(history.insert(row_at(1, 20.0)), InsertOutcome::Replaced);

        assert_eq!(history.len(), 1);
        assert_eq!(history.rows()[0].mean_flow, 20.0);
    }

    #[test]
    fn test_recent_never_exceeds_n() {
        let mut history = History::new(10);
        history.restore((0..6).map(|h| row_at(h, h as f64)));

        assert_eq!(history.recent(3).len(), 3);
        assert_eq!(history.recent(3)[0].mean_flow, 5.0);
        assert_eq!(history.recent(100).len(), 6);
        assert!(history.recent(0).is_empty());
    }
}
