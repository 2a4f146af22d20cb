//! Engine and runtime configuration
//!
//! `EngineConfig` is the validated core configuration; `RuntimeConfig` adds
//! the deployment settings (device address, database path, ...) loaded from
//! environment variables with defaults.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("poll interval must be a positive number of seconds (got {0})")]
    PollInterval(f64),

    #[error("gamma period ({gamma}s) must be at least the poll interval ({poll}s)")]
    GammaPeriod { gamma: f64, poll: f64 },

    #[error("history size must be at least 1")]
    NumBackData,

    #[error("invalid value for {name}: {value:?}")]
    InvalidVar { name: &'static str, value: String },
}

/// Validated core configuration
///
/// Constructed once; an invalid configuration refuses to build an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    poll_interval_seconds: f64,
    gamma_period_seconds: f64,
    num_back_data: usize,
}

impl EngineConfig {
    pub fn new(
        poll_interval_seconds: f64,
        gamma_period_seconds: f64,
        num_back_data: usize,
    ) -> Result<Self, ConfigError> {
        if !poll_interval_seconds.is_finite() || poll_interval_seconds <= 0.0 {
            return Err(ConfigError::PollInterval(poll_interval_seconds));
        }
        if !gamma_period_seconds.is_finite() || gamma_period_seconds < poll_interval_seconds {
            return Err(ConfigError::GammaPeriod {
                gamma: gamma_period_seconds,
                poll: poll_interval_seconds,
            });
        }
        if num_back_data < 1 {
            return Err(ConfigError::NumBackData);
        }

        Ok(Self {
            poll_interval_seconds,
            gamma_period_seconds,
            num_back_data,
        })
    }

    pub fn poll_interval_seconds(&self) -> f64 {
        self.poll_interval_seconds
    }

    pub fn gamma_period_seconds(&self) -> f64 {
        self.gamma_period_seconds
    }

    pub fn num_back_data(&self) -> usize {
        self.num_back_data
    }
}

/// Deployment configuration for the runtime binaries
///
/// Environment variables:
/// - `SAMPLER_POLL_INTERVAL_SECS` (default: 20)
/// - `SAMPLER_GAMMA_PERIOD_SECS` (default: 3600)
/// - `SAMPLER_NUM_BACK_DATA` (default: 200)
/// - `SAMPLER_DEVICE_ADDR` (default: 127.0.0.1:4001)
/// - `SAMPLER_IO_TIMEOUT_MS` (default: 2000)
/// - `SAMPLER_DB_PATH` (default: flowsampler.db)
/// - `SAMPLER_SNAPSHOT_DIR` (default: unset, JSON snapshots disabled)
/// - `SAMPLER_LAYOUT_PATH` (default: unset, built-in line layout)
/// - `SAMPLER_REPLAY_PATH` (default: unset, poll the live device)
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,
    pub device_addr: String,
    pub io_timeout: Duration,
    pub db_path: String,
    pub snapshot_dir: Option<PathBuf>,
    pub layout_path: Option<PathBuf>,
    pub replay_path: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any name -> value lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let poll = parse_or(&lookup, "SAMPLER_POLL_INTERVAL_SECS", 20.0)?;
        let gamma = parse_or(&lookup, "SAMPLER_GAMMA_PERIOD_SECS", 3600.0)?;
        let num_back_data = parse_or(&lookup, "SAMPLER_NUM_BACK_DATA", 200usize)?;
        let timeout_ms = parse_or(&lookup, "SAMPLER_IO_TIMEOUT_MS", 2_000u64)?;

        Ok(Self {
            engine: EngineConfig::new(poll, gamma, num_back_data)?,
            device_addr: lookup("SAMPLER_DEVICE_ADDR")
                .unwrap_or_else(|| "127.0.0.1:4001".to_string()),
            io_timeout: Duration::from_millis(timeout_ms),
            db_path: lookup("SAMPLER_DB_PATH").unwrap_or_else(|| "flowsampler.db".to_string()),
            snapshot_dir: lookup("SAMPLER_SNAPSHOT_DIR").map(PathBuf::from),
            layout_path: lookup("SAMPLER_LAYOUT_PATH").map(PathBuf::from),
            replay_path: lookup("SAMPLER_REPLAY_PATH").map(PathBuf::from),
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidVar { name, value: raw }),
    }
}
