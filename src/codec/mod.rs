use thiserror::Error;

use crate::buffers::{
    reader::{DidntRead, Reader},
    writer::{DidntWrite, Writer},
};

pub(crate) mod decoder;
pub(crate) mod encoder;
pub(crate) mod vle;

pub(crate) use decoder::*;
pub(crate) use encoder::*;

pub(crate) trait WCodec<Message, Buffer> {
    type Output;
    fn write(self, buffer: Buffer, message: Message) -> Self::Output;
}

pub(crate) trait RCodec<Message, Buffer> {
    type Error;
    fn read(self, buffer: Buffer) -> Result<Message, Self::Error>;
}

// Calculate the length of the value once serialized
pub(crate) trait LCodec<Message> {
    fn w_len(self, message: Message) -> usize;
}

#[derive(Clone, Copy)]
pub(crate) struct FrameCodec;

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub(crate) const fn new() -> Self {
        Self
    }
}

/// Length header layout put in front of every frame.
///
/// Both ends of a connection must be configured with the same scheme.
///
/// | scheme      | payload length `L`        | header                                   |
/// |-------------|---------------------------|------------------------------------------|
/// | `Varint`    | `L <= u32::MAX`           | 1 to 5 bytes, 7 bits per byte, LSB first |
/// | `ShortLong` | `L <= 32767`              | 2 bytes big-endian                       |
/// | `ShortLong` | `32767 < L <= 0x7FFF_FFFF`| 4 bytes big-endian, top bit set          |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HeaderScheme {
    /// Variable-length integer: the low 7 bits of each byte carry data, least
    /// significant group first, and `0x80` marks that another byte follows.
    #[default]
    Varint,
    /// Short (2 bytes) or long (4 bytes) big-endian length, told apart by the
    /// top bit of the first byte.
    ShortLong,
}

const SHORT_MAX: usize = 0x7FFF;
const LONG_MAX: usize = 0x7FFF_FFFF;
const LONG_FLAG: u32 = 0x8000_0000;

impl HeaderScheme {
    /// Upper bound on the encoded header size.
    pub const fn max_header_len(self) -> usize {
        match self {
            Self::Varint => vle::VLE_LEN_MAX,
            Self::ShortLong => 4,
        }
    }

    /// Largest payload length the scheme can represent.
    pub const fn max_len(self) -> usize {
        match self {
            Self::Varint => u32::MAX as usize,
            Self::ShortLong => LONG_MAX,
        }
    }

    /// Size of the header announcing `len` payload bytes.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidLength`] if `len` is not representable.
    pub fn header_len(self, len: usize) -> Result<usize, CodecError> {
        self.check(len)?;
        Ok(HeaderCodec { scheme: self }.w_len(len))
    }

    fn check(self, len: usize) -> Result<(), CodecError> {
        if len > self.max_len() {
            return Err(CodecError::InvalidLength {
                len,
                max: self.max_len(),
            });
        }
        Ok(())
    }
}

/// Errors raised while framing.
///
/// None of them is recoverable: partial data is never reported as an error,
/// so whatever surfaces here means the peer (or the caller) broke the framing
/// contract.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// An outbound payload cannot be framed.
    ///
    /// Either its length is not representable by the configured
    /// [`HeaderScheme`] or it exceeds the configured maximum frame length.
    /// The offending payload is dropped; the write is not retried.
    #[error("payload of {len} bytes cannot be framed (limit is {max} bytes)")]
    InvalidLength { len: usize, max: usize },

    /// An inbound header announces more than the decoder accepts.
    ///
    /// Raised for decoded lengths above the maximum frame length, for varints
    /// whose value overflows `u32` and for varints still carrying the
    /// continuation bit on their last allowed byte. The connection is to be
    /// closed: the stream cannot be resynchronized.
    #[error("inbound frame exceeds the limit of {max} bytes")]
    FrameTooLarge { max: usize },
}

/// Why a header could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeaderError {
    /// More bytes are needed.
    Incomplete,
    /// The header can never be completed into a valid length.
    Overflow,
}

/// A header that can never be completed into a valid length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeaderOverflow;

impl From<DidntRead> for HeaderError {
    fn from(_: DidntRead) -> Self {
        Self::Incomplete
    }
}

/// Codec for the length header of one scheme.
#[derive(Clone, Copy)]
pub(crate) struct HeaderCodec {
    pub(crate) scheme: HeaderScheme,
}

impl LCodec<usize> for HeaderCodec {
    fn w_len(self, len: usize) -> usize {
        match self.scheme {
            HeaderScheme::Varint => FrameCodec::new().w_len(len as u32),
            HeaderScheme::ShortLong if len <= SHORT_MAX => 2,
            HeaderScheme::ShortLong => 4,
        }
    }
}

impl<W> WCodec<usize, &mut W> for HeaderCodec
where
    W: Writer,
{
    type Output = Result<(), DidntWrite>;

    // Lengths must have been checked against `HeaderScheme::max_len`.
    fn write(self, writer: &mut W, len: usize) -> Self::Output {
        match self.scheme {
            HeaderScheme::Varint => FrameCodec::new().write(&mut *writer, len as u32),
            HeaderScheme::ShortLong if len <= SHORT_MAX => writer.write_exact(&(len as u16).to_be_bytes()),
            HeaderScheme::ShortLong => writer.write_exact(&(len as u32 | LONG_FLAG).to_be_bytes()),
        }
    }
}

impl<R> RCodec<usize, &mut R> for HeaderCodec
where
    R: Reader,
{
    type Error = HeaderError;

    fn read(self, reader: &mut R) -> Result<usize, Self::Error> {
        match self.scheme {
            HeaderScheme::Varint => {
                let len: u32 = FrameCodec::new().read(&mut *reader)?;
                Ok(len as usize)
            }
            HeaderScheme::ShortLong => {
                let mut short = [0u8; 2];
                reader.read_exact(&mut short)?;
                let short = u16::from_be_bytes(short);
                if short & 0x8000 == 0 {
                    return Ok(short as usize);
                }
                let mut low = [0u8; 2];
                reader.read_exact(&mut low)?;
                let long = (short as u32) << 16 | u16::from_be_bytes(low) as u32;
                Ok((long & !LONG_FLAG) as usize)
            }
        }
    }
}

impl HeaderCodec {
    /// Reads a header from the front of `bytes` without consuming them.
    ///
    /// Returns the announced length and the header size, or `None` when
    /// `bytes` holds only a prefix of a header.
    pub(crate) fn peek(self, bytes: &[u8]) -> Result<Option<(usize, usize)>, HeaderOverflow> {
        let mut reader = bytes;
        match self.read(&mut reader) {
            Ok(len) => Ok(Some((len, bytes.len() - reader.len()))),
            Err(HeaderError::Incomplete) => Ok(None),
            Err(HeaderError::Overflow) => Err(HeaderOverflow),
        }
    }
}
