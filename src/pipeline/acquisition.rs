//! Acquisition - one poll of the record source per tick
//!
//! Wraps a `RecordSource` and stamps each record with the skew between the
//! host clock and the device clock. No retries: a failed poll is returned to
//! the caller as-is.

use super::types::Record;
use crate::source::{RecordSource, SourceError};
use chrono::{DateTime, Duration, Utc};

/// A record plus the host/device clock skew observed when it was read
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub record: Record,
    /// `host_now - record.device_clock`
    pub clock_skew: Duration,
}

impl Reading {
    pub fn clock_skew_seconds(&self) -> f64 {
        self.clock_skew.num_milliseconds() as f64 / 1000.0
    }
}

pub struct Acquisition {
    source: Box<dyn RecordSource>,
    /// Host clock (injectable for testing)
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl Acquisition {
    pub fn new(source: Box<dyn RecordSource>) -> Self {
        Self::new_with_clock(source, Box::new(Utc::now))
    }

    /// Create an acquisition with a custom host clock
    ///
    /// Used for testing with deterministic skew.
    pub fn new_with_clock(
        source: Box<dyn RecordSource>,
        now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self { source, now_fn }
    }

    /// Poll the source once
    pub fn poll(&mut self) -> Result<Reading, SourceError> {
        let record = self.source.poll()?;
        let clock_skew = (self.now_fn)() - record.device_clock;
        Ok(Reading { record, clock_skew })
    }

    pub fn close(&mut self) {
        log::info!("closing record source {}", self.source.describe());
        self.source.close();
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::ActivityStatus;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    struct FixedSource {
        record: Option<Record>,
    }

    impl RecordSource for FixedSource {
        fn poll(&mut self) -> Result<Record, SourceError> {
            self.record.clone().ok_or(SourceError::Timeout)
        }
    }

    fn device_record() -> Record {
        Record {
            device_clock: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            episode_start: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
            status: ActivityStatus::On,
            flow_rate: 60.0,
            pressure_diff: 100.0,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_skew_is_host_minus_device() {
        let host_now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 7).unwrap();
        let mut acquisition = Acquisition::new_with_clock(
            Box::new(FixedSource { record: Some(device_record()) }),
            Box::new(move || host_now),
        );

        let reading = acquisition.poll().unwrap();
        assert_eq!(reading.clock_skew, Duration::seconds(7));
        assert_eq!(reading.clock_skew_seconds(), 7.0);
        assert_eq!(reading.record, device_record());
    }

    #[test]
    fn test_source_failure_is_returned() {
        let mut acquisition = Acquisition::new(Box::new(FixedSource { record: None }));
        assert!(matches!(acquisition.poll(), Err(SourceError::Timeout)));
    }
}
