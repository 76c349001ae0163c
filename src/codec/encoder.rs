use super::{CodecError, HeaderCodec, HeaderScheme, LCodec, WCodec};
use crate::{
    buffers::{ByteBuf, Bytes, Chunk, writer::HasWriter},
    protocol::Priority,
};

/// Default upper bound on a single frame payload: 16 MiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Outbound framing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    pub(crate) scheme: HeaderScheme,
    pub(crate) max_frame_len: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            scheme: HeaderScheme::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl EncoderConfig {
    #[must_use]
    pub fn with_scheme(mut self, scheme: HeaderScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Payloads above `max_frame_len` are refused. The limit is further capped
    /// by what the header scheme can represent.
    #[must_use]
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn scheme(&self) -> HeaderScheme {
        self.scheme
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len.min(self.scheme.max_len())
    }
}

/// A length-prefixed frame ready to be written.
///
/// The bytes are made of two chunks: a small header chunk and the payload
/// chunk, which is a view over the producer's storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
    payload_len: usize,
    priority: Priority,
}

impl Frame {
    /// Header followed by payload.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// Header and payload length.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

/// Turns payload buffers into [`Frame`]s.
///
/// ```
/// use framelane::{ByteBuf, EncoderConfig, FrameEncoder, HeaderScheme, Priority};
///
/// let encoder = FrameEncoder::new(EncoderConfig::default().with_scheme(HeaderScheme::ShortLong));
///
/// let payload = ByteBuf::from(b"hello".to_vec()).with_priority(Priority::new(1));
/// let frame = encoder.encode(payload).unwrap();
///
/// assert_eq!(frame.bytes().to_vec(), b"\x00\x05hello");
/// assert_eq!(frame.priority(), Priority::new(1));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameEncoder {
    config: EncoderConfig,
}

impl FrameEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    fn check(&self, len: usize) -> Result<(), CodecError> {
        let max = self.config.max_frame_len();
        if len > max {
            return Err(CodecError::InvalidLength { len, max });
        }
        Ok(())
    }

    /// Builds the header announcing `len` payload bytes.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidLength`] when `len` exceeds the maximum frame
    /// length or cannot be represented by the scheme.
    pub fn header(&self, len: usize) -> Result<Chunk, CodecError> {
        self.check(len)?;
        let codec = HeaderCodec {
            scheme: self.config.scheme,
        };
        let mut header = Vec::with_capacity(codec.w_len(len));
        codec
            .write(&mut header.writer(), len)
            .map_err(|_| CodecError::InvalidLength {
                len,
                max: self.config.max_frame_len(),
            })?;
        Ok(header.into())
    }

    /// Frames the readable bytes of `payload` without copying them.
    ///
    /// The frame inherits the priority of the buffer.
    pub fn encode(&self, payload: ByteBuf) -> Result<Frame, CodecError> {
        let payload_len = payload.remaining();
        let header = self.header(payload_len)?;
        let priority = payload.priority();

        let mut bytes = Bytes::single(header);
        bytes.push(payload.freeze());
        Ok(Frame {
            bytes,
            payload_len,
            priority,
        })
    }

    /// Frames borrowed bytes. The payload is copied once.
    pub fn encode_slice(&self, payload: &[u8], priority: Priority) -> Result<Frame, CodecError> {
        self.encode(ByteBuf::from(payload).with_priority(priority))
    }
}
