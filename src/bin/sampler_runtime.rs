//! Sampler Runtime - long-running polling engine
//!
//! This binary wires the whole pipeline together:
//! - Opens the SQLite store (schema applied on open)
//! - Restores gamma/episode histories from the store (or JSON snapshots)
//! - Polls the sampler on wall-clock aligned boundaries
//! - Persists every flushed history until CTRL+C
//!
//! Usage:
//!   cargo run --release --bin sampler_runtime
//!
//! Environment variables:
//!   SAMPLER_POLL_INTERVAL_SECS - Poll cadence (default: 20)
//!   SAMPLER_GAMMA_PERIOD_SECS - Gamma window length (default: 3600)
//!   SAMPLER_NUM_BACK_DATA - Rows kept per history (default: 200)
//!   SAMPLER_DEVICE_ADDR - Device server address (default: 127.0.0.1:4001)
//!   SAMPLER_IO_TIMEOUT_MS - Poll timeout (default: 2000)
//!   SAMPLER_DB_PATH - SQLite database path (default: flowsampler.db)
//!   SAMPLER_SNAPSHOT_DIR - Also write JSON snapshots here (default: unset)
//!   SAMPLER_LAYOUT_PATH - JSON line layout (default: built-in)
//!   SAMPLER_REPLAY_PATH - Replay recorded lines instead of polling (default: unset)

use dotenv::dotenv;
use flowsampler::pipeline::{
    load_snapshot, Acquisition, AggregateSink, HistoryKind, JsonSnapshotSink, PipelineEngine,
    RuntimeConfig, SqliteAggregateSink, Station,
};
use flowsampler::source::{
    FixedWidthParser, LineLayout, LineRecordSource, RecordSource, ReplaySource, TcpLineTransport,
};
use log::{error, info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::init();

    info!("🚀 Flow Sampler Runtime");

    let config = RuntimeConfig::from_env()?;
    info!("   ├─ Poll interval: {}s", config.engine.poll_interval_seconds());
    info!("   ├─ Gamma period: {}s", config.engine.gamma_period_seconds());
    info!("   ├─ History size: {} rows", config.engine.num_back_data());
    info!("   └─ Database: {}", config.db_path);

    // Record source
    let parser = match &config.layout_path {
        Some(path) => {
            info!("📐 Using line layout from {}", path.display());
            FixedWidthParser::new(LineLayout::from_json_file(path)?)
        }
        None => FixedWidthParser::default(),
    };
    let source: Box<dyn RecordSource> = match &config.replay_path {
        Some(path) => Box::new(ReplaySource::from_file(path, parser)?),
        None => Box::new(LineRecordSource::new(
            TcpLineTransport::new(config.device_addr.clone(), config.io_timeout),
            parser,
        )),
    };
    info!("✅ Record source: {}", source.describe());

    // Sinks
    info!("🔧 Initializing database...");
    let sqlite = Arc::new(SqliteAggregateSink::new(&config.db_path)?);
    let mut sinks: Vec<Arc<dyn AggregateSink>> = vec![sqlite.clone()];
    if let Some(dir) = &config.snapshot_dir {
        sinks.push(Arc::new(JsonSnapshotSink::new(dir.clone())?));
        info!("✅ JSON snapshots enabled in {}", dir.display());
    }
    info!("✅ Database initialized");

    // Engine, re-seeded from the previous run
    let mut engine = PipelineEngine::new(config.engine.clone());
    for kind in HistoryKind::all() {
        let mut rows = sqlite.load_rows(kind, config.engine.num_back_data())?;
        if rows.is_empty() {
            if let Some(dir) = &config.snapshot_dir {
                rows = load_snapshot(dir, kind).unwrap_or_else(|e| {
                    warn!("⚠️  Could not read {} snapshot: {}", kind.as_str(), e);
                    Vec::new()
                });
            }
        }
        let kept = engine.restore(kind, rows);
        info!("   ├─ Restored {} {} rows", kept, kind.as_str());
    }
    info!("✅ PipelineEngine created");

    let station = Arc::new(Station::new(engine, Acquisition::new(source), sinks));
    let scheduler = station.start_polling();

    info!("");
    info!("📊 Sampler Status:");
    info!("   └─ Polling every {}s on aligned boundaries", station.poll_interval_secs());
    info!("");
    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    station.shutdown(scheduler).await?;

    let recent = station.recent(1)?;
    if let Some(row) = recent.gamma_rows.first() {
        info!("   ├─ Last gamma window: {} → {}", row.window_start, row.window_end);
    }
    if let Some(row) = recent.episode_rows.first() {
        info!("   ├─ Last episode: {} → {}", row.window_start, row.window_end);
    }

    info!("✅ Sampler runtime stopped");
    Ok(())
}
