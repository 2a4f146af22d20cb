//! Fixed-width line parser for sampler poll responses
//!
//! A response looks like `S<body>E`. The body is cut into named, half-open
//! character columns `[start, end)`. Each column is typed:
//!
//! - `datetime` - `dd/mm/YYYY HH:MM:SS`, device clock read as UTC
//! - `timedelta` - `HH:MM:SS`, stored as seconds
//! - `int` / `float` - plain numbers
//!
//! `startdatetime`, `actualdatetime`, `status`, `flowrate` and `Pdiff` are
//! required; every other numeric column is carried in `Record::extra`.

use super::SourceError;
use crate::pipeline::types::{ActivityStatus, Record};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DATETIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

const FIELD_EPISODE_START: &str = "startdatetime";
const FIELD_DEVICE_CLOCK: &str = "actualdatetime";
const FIELD_STATUS: &str = "status";
const FIELD_FLOW_RATE: &str = "flowrate";
const FIELD_PRESSURE_DIFF: &str = "Pdiff";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Datetime,
    Timedelta,
    Int,
    Float,
}

/// One column of the layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// `[start, end)` character offsets inside the delimited body
    pub position: (usize, usize),
    #[serde(rename = "type")]
    pub kind: FieldKind,
}

/// Line layout, loadable from JSON:
///
/// ```json
/// { "delimiters": ["S", "E"],
///   "parameters": { "flowrate": { "position": [37, 43], "type": "float" } } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineLayout {
    pub delimiters: (char, char),
    pub parameters: BTreeMap<String, FieldSpec>,
}

impl LineLayout {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl Default for LineLayout {
    /// Layout of the instrument's `poll` response
    fn default() -> Self {
        use FieldKind::*;
        let columns: [(&str, usize, usize, FieldKind); 20] = [
            ("startdatetime", 1, 20, Datetime),
            ("duration", 21, 29, Timedelta),
            ("status", 30, 31, Int),
            ("Pdiff", 32, 36, Float),
            ("flowrate", 37, 43, Float),
            ("airvolume", 44, 51, Float),
            ("temperatureafilter", 52, 57, Float),
            ("Pafilter", 58, 63, Float),
            ("temperature", 64, 69, Float),
            ("winddir", 70, 73, Float),
            ("windspeed", 74, 78, Float),
            ("pressure", 79, 85, Float),
            ("humidity", 86, 91, Float),
            ("rainfall", 92, 96, Float),
            ("tamper_1", 97, 98, Int),
            ("tamper_2", 99, 100, Int),
            ("actualdatetime", 101, 120, Datetime),
            ("unknown0", 121, 128, Float),
            ("unknown1", 129, 133, Int),
            ("unknown2", 134, 141, Float),
        ];

        Self {
            delimiters: ('S', 'E'),
            parameters: columns
                .iter()
                .map(|(name, start, end, kind)| {
                    (
                        name.to_string(),
                        FieldSpec {
                            position: (*start, *end),
                            kind: *kind,
                        },
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Time(DateTime<Utc>),
    Number(f64),
}

#[derive(Debug, Clone, Default)]
pub struct FixedWidthParser {
    layout: LineLayout,
}

impl FixedWidthParser {
    pub fn new(layout: LineLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &LineLayout {
        &self.layout
    }

    /// Parse one raw response line into a `Record`
    pub fn parse(&self, line: &str) -> Result<Record, SourceError> {
        let body = self.body(line)?;
        let chars: Vec<char> = body.chars().collect();

        let mut values: BTreeMap<&str, FieldValue> = BTreeMap::new();
        for (name, spec) in &self.layout.parameters {
            let raw = column(&chars, spec.position);
            if raw.is_empty() {
                continue;
            }
            if let Some(value) = convert(&raw, spec.kind) {
                values.insert(name.as_str(), value);
            } else if is_required(name) {
                return Err(SourceError::MalformedLine(format!(
                    "field {} has unparsable value {:?}",
                    name, raw
                )));
            }
        }

        let device_clock = required_time(&values, FIELD_DEVICE_CLOCK)?;
        let episode_start = required_time(&values, FIELD_EPISODE_START)?;
        let status = required_number(&values, FIELD_STATUS)?;
        let flow_rate = required_number(&values, FIELD_FLOW_RATE)?;
        let pressure_diff = required_number(&values, FIELD_PRESSURE_DIFF)?;

        let extra = values
            .iter()
            .filter(|(name, _)| !is_required(name))
            .map(|(name, value)| {
                let number = match value {
                    FieldValue::Number(n) => *n,
                    FieldValue::Time(t) => t.timestamp() as f64,
                };
                (name.to_string(), number)
            })
            .collect();

        Ok(Record {
            device_clock,
            episode_start,
            status: ActivityStatus::from_code(status.round() as i64),
            flow_rate,
            pressure_diff,
            extra,
        })
    }

    /// Text between the start delimiter and the following end delimiter
    fn body<'a>(&self, line: &'a str) -> Result<&'a str, SourceError> {
        let (open, close) = self.layout.delimiters;
        let start = line
            .find(open)
            .ok_or_else(|| SourceError::MalformedLine(format!("missing start delimiter {:?}", open)))?
            + open.len_utf8();
        let end = line[start..]
            .find(close)
            .ok_or_else(|| SourceError::MalformedLine(format!("missing end delimiter {:?}", close)))?;
        Ok(&line[start..start + end])
    }
}

fn column(chars: &[char], (start, end): (usize, usize)) -> String {
    let end = end.min(chars.len());
    if start >= end {
        return String::new();
    }
    chars[start..end].iter().collect::<String>().trim().to_string()
}

fn convert(raw: &str, kind: FieldKind) -> Option<FieldValue> {
    match kind {
        FieldKind::Datetime => NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
            .ok()
            .map(|naive| FieldValue::Time(naive.and_utc())),
        FieldKind::Timedelta => parse_hms(raw).map(FieldValue::Number),
        FieldKind::Int | FieldKind::Float => raw
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(FieldValue::Number),
    }
}

/// `HH:MM:SS` (hours may exceed 24) to seconds
fn parse_hms(raw: &str) -> Option<f64> {
    let mut parts = raw.split(':');
    let hours: f64 = parts.next()?.trim().parse().ok()?;
    let minutes: f64 = parts.next()?.trim().parse().ok()?;
    let seconds: f64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    total.is_finite().then_some(total)
}

fn is_required(name: &str) -> bool {
    matches!(
        name,
        FIELD_EPISODE_START | FIELD_DEVICE_CLOCK | FIELD_STATUS | FIELD_FLOW_RATE | FIELD_PRESSURE_DIFF
    )
}

fn required_time(values: &BTreeMap<&str, FieldValue>, name: &str) -> Result<DateTime<Utc>, SourceError> {
    match values.get(name) {
        Some(FieldValue::Time(t)) => Ok(*t),
        Some(FieldValue::Number(_)) => Err(SourceError::MalformedLine(format!(
            "field {} is not a datetime column",
            name
        ))),
        None => Err(SourceError::MalformedLine(format!("missing field {}", name))),
    }
}

fn required_number(values: &BTreeMap<&str, FieldValue>, name: &str) -> Result<f64, SourceError> {
    match values.get(name) {
        Some(FieldValue::Number(n)) => Ok(*n),
        Some(FieldValue::Time(_)) => Err(SourceError::MalformedLine(format!(
            "field {} is not a numeric column",
            name
        ))),
        None => Err(SourceError::MalformedLine(format!("missing field {}", name))),
    }
}

/// Build a response line in the default layout
#[cfg(test)]
pub(crate) fn sample_line(
    start: &str,
    status: u8,
    pdiff: f64,
    flow: f64,
    actual: &str,
) -> String {
    let mut body = vec![' '; 141];
    let mut put = |offset: usize, text: &str| {
        for (i, c) in text.chars().enumerate() {
            body[offset + i] = c;
        }
    };
    put(1, start);
    put(21, "02:15:40");
    put(30, &status.to_string());
    put(32, &format!("{:4.0}", pdiff));
    put(37, &format!("{:6.2}", flow));
    put(44, &format!("{:7.1}", 1234.5));
    put(64, &format!("{:5.1}", 18.4));
    put(79, &format!("{:6.1}", 1013.2));
    put(101, actual);
    put(121, "    0.0");
    format!("S{}E\r\n", body.iter().collect::<String>())
}
