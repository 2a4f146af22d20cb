//! # Sampler aggregation pipeline
//!
//! Polls a flow sampler on a wall-clock aligned cadence and keeps two kinds of
//! finalized aggregates in memory:
//! - **gamma** rows: fixed-period windows (e.g. hourly) aligned to the epoch
//! - **episode** rows: one per pump run, from activity start to stop
//!
//! ## Architecture
//!
//! ```text
//! PollScheduler ──tick(boundary)──► Station
//!                                     ├─ Acquisition::poll()   (blocking pool)
//!                                     ├─ PipelineEngine::ingest() (engine lock)
//!                                     │    ├─ GammaAggregator   → History
//!                                     │    └─ EpisodeAggregator → History
//!                                     └─ AggregateSink::persist() (unlocked)
//! ```
//!
//! **Key Principle:** a failed poll never touches aggregate state, and readers
//! only ever receive owned copies taken under the engine lock.
//!
//! ## Module Organization
//!
//! - `types` - Core data structures (Record, AggregateRow, RecentAggregates)
//! - `stats` - Online mean/variance accumulator
//! - `history` - Bounded newest-first row buffer
//! - `windows` - Aggregator trait and gamma windows
//! - `episode` - Pump episode aggregator
//! - `engine` - Owns aggregators and histories
//! - `acquisition` - Source poll with clock skew
//! - `scheduler` - Aligned poll loop
//! - `station` - Tick orchestration and query surface
//! - `db` - Sink trait and SQLite sink
//! - `persistence` - JSON snapshot sink
//! - `config` - Engine and runtime configuration

pub mod acquisition;
pub mod config;
pub mod db;
pub mod engine;
pub mod episode;
pub mod history;
pub mod persistence;
pub mod scheduler;
pub mod station;
pub mod stats;
pub mod types;
pub mod windows;

// Re-export commonly used types
pub use acquisition::{Acquisition, Reading};
pub use config::{ConfigError, EngineConfig, RuntimeConfig};
pub use db::{AggregateSink, PersistOutcome, SinkError, SqliteAggregateSink};
pub use engine::{IngestOutcome, PipelineEngine};
pub use episode::EpisodeAggregator;
pub use history::History;
pub use persistence::{load_snapshot, JsonSnapshotSink};
pub use scheduler::PollScheduler;
pub use station::{Station, StationError, TickReport};
pub use stats::RecursiveStats;
pub use types::{ActivityStatus, AggregateRow, HistoryKind, RecentAggregates, Record};
pub use windows::{GammaAggregator, RecordAggregator};
