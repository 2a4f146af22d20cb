//! Replay recorded poll responses from a text file
//!
//! One raw response line per line of the file; blank lines and `#` comments
//! are skipped. Once the file is exhausted the source reports
//! `TransportClosed`.

use super::parser::FixedWidthParser;
use super::{RecordSource, SourceError};
use crate::pipeline::types::Record;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ReplaySource {
    path: PathBuf,
    lines: VecDeque<String>,
    parser: FixedWidthParser,
}

impl ReplaySource {
    pub fn from_file(path: impl AsRef<Path>, parser: FixedWidthParser) -> std::io::Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let lines = content
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect::<VecDeque<_>>();

        log::info!("📼 Loaded {} recorded lines from {}", lines.len(), path.as_ref().display());
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            lines,
            parser,
        })
    }

    pub fn remaining(&self) -> usize {
        self.lines.len()
    }
}

impl RecordSource for ReplaySource {
    fn poll(&mut self) -> Result<Record, SourceError> {
        let line = self.lines.pop_front().ok_or(SourceError::TransportClosed)?;
        self.parser.parse(&line)
    }

    fn close(&mut self) {
        self.lines.clear();
    }

    fn describe(&self) -> String {
        format!("replay://{}", self.path.display())
    }
}
