//! Crate-wide error type.
use std::{io, sync::Arc};

use thiserror::Error;

use crate::{
    buffers::BufferError,
    codec::CodecError,
    handshake::HandshakeError,
};

/// Every error a connection task can end with.
///
/// The per-layer errors convert into it with `?`. It is cheap to clone so
/// that a fatal error can be reported both through
/// [`Event::Closed`](crate::Event::Closed) and the task exit value.
#[derive(Debug, Error, Clone)]
pub enum Error {
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// A read or write on the stream did not complete within its timeout.
    #[error("I/O timed out")]
    Timeout,

    /// The inbox was dropped while the connection still had events for it.
    #[error("inbox closed")]
    Closed,
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

/// Result type alias using [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::ByteBuf;

    fn read_two(buf: &mut ByteBuf) -> Result<u16> {
        Ok(buf.read_short()?)
    }

    #[test]
    fn error_conversions() {
        let mut buf = ByteBuf::from(vec![1u8]);
        assert!(matches!(read_two(&mut buf), Err(Error::Buffer(_))));

        let e: Error = HandshakeError::Incomplete.into();
        assert_eq!(e.to_string(), "handshake error: stream ended before the handshake");

        let e = Error::from(io::Error::from(io::ErrorKind::BrokenPipe));
        let c = e.clone();
        println!("{c}");
        assert!(matches!(c, Error::Io(ref io) if io.kind() == io::ErrorKind::BrokenPipe));
    }
}
