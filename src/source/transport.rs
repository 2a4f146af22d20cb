//! Line transports and the line-based record source
//!
//! The sampler answers a `poll` command with a single line. Serial links are
//! usually exposed through a serial-to-Ethernet device server, so the bundled
//! transport is a TCP stream with read/write timeouts.

use super::parser::FixedWidthParser;
use super::{RecordSource, SourceError};
use crate::pipeline::types::Record;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Command that asks the instrument for its current reading
pub const POLL_COMMAND: &str = "poll\r\n";

/// Request/response line link
pub trait LineTransport: Send {
    /// Send `command` and return the response line (terminator stripped)
    fn request(&mut self, command: &str) -> Result<String, SourceError>;

    fn close(&mut self) {}

    fn describe(&self) -> String;
}

/// TCP transport with lazy (re)connection
///
/// A failed request drops the connection; the next request reconnects. There
/// is no retry inside a request.
pub struct TcpLineTransport {
    addr: String,
    timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
    closed: bool,
}

impl TcpLineTransport {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            stream: None,
            closed: false,
        }
    }

    fn connect(&self) -> Result<BufReader<TcpStream>, SourceError> {
        let addr = self
            .addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SourceError::Io(std::io::Error::other(format!("cannot resolve {}", self.addr))))?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;

        log::info!("🔌 Connected to sampler at {}", self.addr);
        Ok(BufReader::new(stream))
    }

    fn exchange(stream: &mut BufReader<TcpStream>, command: &str) -> Result<String, SourceError> {
        stream.get_mut().write_all(command.as_bytes())?;
        stream.get_mut().flush()?;

        let mut line = String::new();
        let read = stream.read_line(&mut line)?;
        if read == 0 {
            return Err(SourceError::TransportClosed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl LineTransport for TcpLineTransport {
    fn request(&mut self, command: &str) -> Result<String, SourceError> {
        if self.closed {
            return Err(SourceError::TransportClosed);
        }

        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.connect()?,
        };

        let result = Self::exchange(&mut stream, command);
        if result.is_ok() {
            self.stream = Some(stream);
        }
        result
    }

    fn close(&mut self) {
        self.closed = true;
        if let Some(stream) = self.stream.take() {
            let _ = stream.get_ref().shutdown(std::net::Shutdown::Both);
        }
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

/// Record source that polls a line transport and parses the response
pub struct LineRecordSource<T: LineTransport> {
    transport: T,
    parser: FixedWidthParser,
}

impl<T: LineTransport> LineRecordSource<T> {
    pub fn new(transport: T, parser: FixedWidthParser) -> Self {
        Self { transport, parser }
    }

    /// Fetch the raw response line without parsing it
    pub fn poll_raw(&mut self) -> Result<String, SourceError> {
        self.transport.request(POLL_COMMAND)
    }

    pub fn parser(&self) -> &FixedWidthParser {
        &self.parser
    }
}

impl<T: LineTransport> RecordSource for LineRecordSource<T> {
    fn poll(&mut self) -> Result<Record, SourceError> {
        let line = self.poll_raw()?;
        log::trace!("raw response: {:?}", line);
        self.parser.parse(&line)
    }

    fn close(&mut self) {
        self.transport.close();
    }

    fn describe(&self) -> String {
        self.transport.describe()
    }
}
