//! Record sources - where poll responses come from
//!
//! The engine only sees the `RecordSource` trait. Concrete sources compose a
//! `LineTransport` (how a response line is fetched) with a `FixedWidthParser`
//! (how a line becomes a `Record`).
//!
//! ## Module Organization
//!
//! - `parser` - fixed-width line layout and parser
//! - `transport` - line transports (TCP) and `LineRecordSource`
//! - `replay` - replays recorded response lines from a file

pub mod parser;
pub mod replay;
pub mod transport;

use crate::pipeline::types::Record;
use std::io;
use thiserror::Error;

pub use parser::{FieldKind, FieldSpec, FixedWidthParser, LineLayout};
pub use replay::ReplaySource;
pub use transport::{LineRecordSource, LineTransport, TcpLineTransport, POLL_COMMAND};

/// Why a poll produced no record
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("device did not answer within the transport timeout")]
    Timeout,

    #[error("malformed line: {0}")]
    MalformedLine(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("transport error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for SourceError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => SourceError::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => SourceError::TransportClosed,
            _ => SourceError::Io(err),
        }
    }
}

/// Something that can be polled for one `Record`
///
/// `poll()` is blocking and bounded by the source's own timeout. Callers run
/// it off the async runtime.
pub trait RecordSource: Send {
    fn poll(&mut self) -> Result<Record, SourceError>;

    /// Release the underlying transport; later polls fail with `TransportClosed`
    fn close(&mut self) {}

    /// Short description for logging
    fn describe(&self) -> String {
        "record source".to_string()
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn poll(&mut self) -> Result<Record, SourceError> {
        (**self).poll()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let timeout: SourceError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert!(matches!(timeout, SourceError::Timeout));

        let would_block: SourceError = io::Error::new(io::ErrorKind::WouldBlock, "slow").into();
        assert!(matches!(would_block, SourceError::Timeout));

        let closed: SourceError = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(closed, SourceError::TransportClosed));

        let other: SourceError = io::Error::new(io::ErrorKind::PermissionDenied, "no").into();
        assert!(matches!(other, SourceError::Io(_)));
    }
}
