//! Poll Once - single diagnostic poll of the sampler
//!
//! Sends one poll command and prints the raw response line, the parsed
//! record as JSON, or both.
//!
//! Usage:
//!   cargo run --bin poll_once -- [raw|parsed|both]
//!
//! Uses the same SAMPLER_* environment variables as `sampler_runtime`.

use dotenv::dotenv;
use flowsampler::pipeline::RuntimeConfig;
use flowsampler::source::{
    FixedWidthParser, LineLayout, LineRecordSource, RecordSource, TcpLineTransport,
};
use log::info;

#[derive(Debug, Clone, Copy, PartialEq)]
enum OutputMode {
    Raw,
    Parsed,
    Both,
}

fn parse_mode_from_args() -> Result<OutputMode, Box<dyn std::error::Error>> {
    match std::env::args().nth(1).as_deref() {
        None | Some("both") => Ok(OutputMode::Both),
        Some("raw") => Ok(OutputMode::Raw),
        Some("parsed") => Ok(OutputMode::Parsed),
        Some(other) => Err(format!("unknown mode '{}' (expected raw, parsed or both)", other).into()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let mode = parse_mode_from_args()?;
    let config = RuntimeConfig::from_env()?;

    let parser = match &config.layout_path {
        Some(path) => FixedWidthParser::new(LineLayout::from_json_file(path)?),
        None => FixedWidthParser::default(),
    };
    let mut source = LineRecordSource::new(
        TcpLineTransport::new(config.device_addr.clone(), config.io_timeout),
        parser,
    );
    info!("🔌 Polling {}", source.describe());

    let line = source.poll_raw()?;
    if mode != OutputMode::Parsed {
        println!("{}", line);
    }
    if mode != OutputMode::Raw {
        let record = source.parser().parse(&line)?;
        println!("{}", serde_json::to_string_pretty(&record)?);
    }

    source.close();
    Ok(())
}
