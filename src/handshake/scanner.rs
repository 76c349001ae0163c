use super::HandshakeError;
use crate::buffers::ByteBuf;

/// Default upper bound on the length of a single line, CRLF excluded.
pub const DEFAULT_MAX_LINE_LEN: usize = 8192;

const CRLF: &[u8] = b"\r\n";

/// Reassembles CRLF-terminated text lines out of arbitrarily fragmented input.
///
/// Input is consumed up to the end of the next line only, so whatever follows
/// a line stays unread in the caller's buffer. A partial line is kept in an
/// internal buffer that never holds more than one unterminated line.
///
/// ```
/// use framelane::{ByteBuf, LineScanner};
///
/// let mut scanner = LineScanner::new();
/// let mut input = ByteBuf::from(&b"GET / HT"[..]);
/// assert_eq!(scanner.next_line(&mut input).unwrap(), None);
///
/// let mut input = ByteBuf::from(&b"TP/1.1\r\nHost"[..]);
/// assert_eq!(scanner.next_line(&mut input).unwrap().as_deref(), Some("GET / HTTP/1.1"));
/// assert_eq!(input.as_slice(), b"Host");
/// ```
#[derive(Debug)]
pub struct LineScanner {
    acc: ByteBuf,
    // Offset in `acc` before which no CRLF starts
    scanned: usize,
    max_line_len: usize,
}

impl Default for LineScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl LineScanner {
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            acc: ByteBuf::new(),
            scanned: 0,
            max_line_len,
        }
    }

    pub fn max_line_len(&self) -> usize {
        self.max_line_len
    }

    /// Number of bytes of the current unterminated line.
    pub fn pending(&self) -> usize {
        self.acc.remaining()
    }

    /// Returns the next complete line, without its CRLF, or `None` once
    /// `input` is exhausted.
    ///
    /// # Errors
    ///
    /// - [`HandshakeError::LineTooLong`] if the line exceeds the maximum length.
    /// - [`HandshakeError::InvalidText`] if the line is not valid UTF-8.
    pub fn next_line(&mut self, input: &mut ByteBuf) -> Result<Option<String>, HandshakeError> {
        while input.is_readable() {
            // Move bytes up to and including the next LF, a CRLF can only
            // end there
            let n = match input.index_of(b"\n", input.reader_index())? {
                Some(pos) => pos - input.reader_index() + 1,
                None => input.remaining(),
            };
            self.acc.drain_from(input, Some(n));

            if let Some(line) = self.take_line()? {
                return Ok(Some(line));
            }
            // A trailing CR may still be the start of the terminator
            if self.acc.remaining() > self.max_line_len + 1 {
                return Err(HandshakeError::LineTooLong {
                    max: self.max_line_len,
                });
            }
        }
        Ok(None)
    }

    fn take_line(&mut self) -> Result<Option<String>, HandshakeError> {
        let from = self.scanned.max(self.acc.reader_index());
        if from >= self.acc.writer_index() {
            return Ok(None);
        }
        let Some(pos) = self.acc.index_of(CRLF, from)? else {
            self.scanned = self.acc.writer_index() - 1;
            return Ok(None);
        };

        let len = pos - self.acc.reader_index();
        if len > self.max_line_len {
            return Err(HandshakeError::LineTooLong {
                max: self.max_line_len,
            });
        }
        let line = std::str::from_utf8(&self.acc.as_slice()[..len])
            .map_err(|_| HandshakeError::InvalidText)?
            .to_owned();
        self.acc.skip(len + CRLF.len())?;
        self.acc.compact();
        self.scanned = 0;
        Ok(Some(line))
    }

    /// Forgets the current partial line.
    pub fn clear(&mut self) {
        self.acc.clear();
        self.scanned = 0;
    }
}
