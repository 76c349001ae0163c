//! Text handshake preceding the framed stream.
//!
//! A connection may open with a small text preamble: a request line followed
//! by `name: value` header lines and an empty line, every line terminated by
//! CRLF. [`HandshakeParser`] collects it out of arbitrarily fragmented reads
//! and leaves whatever follows the empty line to the frame decoder.
mod request;
mod scanner;

pub use request::*;
pub use scanner::*;
use thiserror::Error;
use tracing::debug;

use crate::buffers::{BufferError, ByteBuf};

/// Errors raised while parsing a handshake.
///
/// All variants but [`Incomplete`](HandshakeError::Incomplete) mean the peer
/// is not speaking the expected protocol and the connection should be closed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The first line does not contain `METHOD URI VERSION`.
    #[error("malformed request line: {line:?}")]
    MalformedRequestLine { line: String },

    /// A header line has no `:` separator or an empty name.
    #[error("malformed header line: {line:?}")]
    MalformedHeader { line: String },

    /// A line is not valid UTF-8.
    #[error("handshake line is not valid text")]
    InvalidText,

    /// A line grew past the configured maximum without a CRLF.
    ///
    /// Guards the accumulation buffer against peers that never terminate a
    /// line.
    #[error("handshake line longer than {max} bytes")]
    LineTooLong { max: usize },

    /// The stream ended before a request line was received.
    #[error("stream ended before the handshake")]
    Incomplete,

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Incremental handshake parser.
///
/// Feed it every read with [`decode`](HandshakeParser::decode) until it
/// returns the [`Handshake`]. The parser is then reset and may be reused.
///
/// ```
/// use framelane::{ByteBuf, HandshakeParser};
///
/// let mut parser = HandshakeParser::new();
///
/// let mut input = ByteBuf::from(&b"GET /feed HTTP/1.1\r\nHost: exa"[..]);
/// assert!(parser.decode(&mut input).unwrap().is_none());
///
/// let mut input = ByteBuf::from(&b"mple.com\r\n\r\n\x03abc"[..]);
/// let handshake = parser.decode(&mut input).unwrap().unwrap();
/// assert_eq!(handshake.request_line().uri(), "/feed");
/// assert_eq!(handshake.headers().get("host"), Some("example.com"));
///
/// // The framed stream starts right after the empty line
/// assert_eq!(input.as_slice(), b"\x03abc");
/// ```
#[derive(Debug, Default)]
pub struct HandshakeParser {
    scanner: LineScanner,
    request_line: Option<RequestLine>,
    headers: HeaderFields,
}

impl HandshakeParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            scanner: LineScanner::with_max_line_len(max_line_len),
            ..Self::default()
        }
    }

    /// Consumes lines from `input` and returns the handshake once its empty
    /// line has been read. Bytes following the empty line are left unread.
    pub fn decode(&mut self, input: &mut ByteBuf) -> Result<Option<Handshake>, HandshakeError> {
        while let Some(line) = self.scanner.next_line(input)? {
            if self.request_line.is_none() {
                let request_line = RequestLine::parse(&line)?;
                debug!(
                    method = request_line.method(),
                    uri = request_line.uri(),
                    "Handshake started"
                );
                self.request_line = Some(request_line);
            } else if line.is_empty() {
                let headers = std::mem::take(&mut self.headers);
                let Some(request_line) = self.request_line.take() else {
                    return Err(HandshakeError::Incomplete);
                };
                debug!(headers = headers.len(), "Handshake complete");
                return Ok(Some(Handshake::new(request_line, headers)));
            } else {
                self.headers.append_line(&line)?;
            }
        }
        Ok(None)
    }

    /// Returns what has been collected so far at the end of the stream.
    ///
    /// # Errors
    ///
    /// [`HandshakeError::Incomplete`] if no request line was received.
    pub fn finish(&mut self) -> Result<Handshake, HandshakeError> {
        let request_line = self.request_line.take().ok_or(HandshakeError::Incomplete)?;
        let headers = std::mem::take(&mut self.headers);
        self.scanner.clear();
        Ok(Handshake::new(request_line, headers))
    }

    /// Whether a request line has been received and the handshake is still
    /// waiting for its empty line.
    pub fn is_started(&self) -> bool {
        self.request_line.is_some()
    }
}
