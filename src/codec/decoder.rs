use tracing::debug;

use super::{CodecError, HeaderCodec, HeaderOverflow, HeaderScheme, encoder::DEFAULT_MAX_FRAME_LEN};
use crate::buffers::{ByteBuf, Chunk};

/// How a payload fully contained in one read is handed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SliceMode {
    /// Payloads are views over the read buffer. Any such view keeps the whole
    /// read buffer alive until dropped.
    #[default]
    ZeroCopy,
    /// Payloads are copied into their own storage when the read buffer holds
    /// more than one frame, so each frame can be released independently.
    Copy,
}

/// Inbound framing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    pub(crate) scheme: HeaderScheme,
    pub(crate) max_frame_len: usize,
    pub(crate) slice_mode: SliceMode,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            scheme: HeaderScheme::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            slice_mode: SliceMode::default(),
        }
    }
}

impl DecoderConfig {
    #[must_use]
    pub fn with_scheme(mut self, scheme: HeaderScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Headers announcing more than `max_frame_len` bytes are rejected with
    /// [`CodecError::FrameTooLarge`].
    #[must_use]
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    #[must_use]
    pub fn with_slice_mode(mut self, slice_mode: SliceMode) -> Self {
        self.slice_mode = slice_mode;
        self
    }

    pub fn scheme(&self) -> HeaderScheme {
        self.scheme
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len.min(self.scheme.max_len())
    }

    pub fn slice_mode(&self) -> SliceMode {
        self.slice_mode
    }
}

/// Reassembles frames out of an arbitrarily fragmented byte stream.
///
/// Each call to [`decode`](FrameDecoder::decode) consumes the whole input and
/// emits every frame completed by it. Bytes of an incomplete header or
/// payload are kept in pending buffers until the next call:
///
/// ```text
///                 header complete              payload complete
///  AwaitLength ─────────────────────► AwaitPayload ──────────────► emit ─┐
///       ▲                                                                │
///       └────────────────────────────────────────────────────────────────┘
/// ```
///
/// Bytes are copied into pending state at most once and are never dropped or
/// duplicated. A decoder belongs to one connection.
///
/// ```
/// use framelane::{ByteBuf, DecoderConfig, FrameDecoder};
///
/// let mut decoder = FrameDecoder::new(DecoderConfig::default());
/// let mut frames = vec![];
///
/// // "hi" split across two reads
/// decoder.decode(&mut ByteBuf::from(vec![2, b'h']), |f| frames.push(f)).unwrap();
/// assert!(frames.is_empty());
/// decoder.decode(&mut ByteBuf::from(vec![b'i']), |f| frames.push(f)).unwrap();
///
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0], b"hi");
/// assert!(decoder.is_idle());
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    config: DecoderConfig,
    // Length of the frame whose payload is being received
    awaited: Option<usize>,
    pending_header: Option<ByteBuf>,
    pending_payload: Option<ByteBuf>,
}

impl FrameDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            awaited: None,
            pending_header: None,
            pending_payload: None,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Returns `true` when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.awaited.is_none() && self.pending_header.is_none() && self.pending_payload.is_none()
    }

    /// Drops any partial frame.
    pub fn reset(&mut self) {
        self.awaited = None;
        self.pending_header = None;
        self.pending_payload = None;
    }

    /// Consumes all readable bytes of `input`, calling `emit` once per
    /// completed frame payload, in stream order.
    ///
    /// # Errors
    ///
    /// [`CodecError::FrameTooLarge`] when a header is malformed or announces
    /// more than the maximum frame length. The stream cannot be recovered:
    /// the connection must be closed.
    pub fn decode<F>(&mut self, input: &mut ByteBuf, mut emit: F) -> Result<(), CodecError>
    where
        F: FnMut(Chunk),
    {
        loop {
            let len = match self.awaited {
                Some(len) => len,
                None => match self.read_header(input)? {
                    Some(len) => {
                        self.awaited = Some(len);
                        len
                    }
                    None => return Ok(()),
                },
            };

            match self.read_payload(input, len) {
                Some(payload) => {
                    self.awaited = None;
                    emit(payload);
                }
                None => return Ok(()),
            }
        }
    }

    fn too_large(&self) -> CodecError {
        CodecError::FrameTooLarge {
            max: self.config.max_frame_len(),
        }
    }

    fn check(&self, len: usize) -> Result<usize, CodecError> {
        if len > self.config.max_frame_len() {
            debug!(len, max = self.config.max_frame_len(), "Inbound frame too large");
            return Err(self.too_large());
        }
        Ok(len)
    }

    fn read_header(&mut self, input: &mut ByteBuf) -> Result<Option<usize>, CodecError> {
        let codec = HeaderCodec {
            scheme: self.config.scheme,
        };

        // Continue a header split over previous reads, one byte at a time so
        // that no payload byte ends up in the header buffer.
        if let Some(pending) = self.pending_header.as_mut() {
            while pending.drain_from(input, Some(1)) == 1 {
                match codec.peek(pending.as_slice()) {
                    Ok(Some((len, _))) => {
                        self.pending_header = None;
                        return self.check(len).map(Some);
                    }
                    Ok(None) => {}
                    Err(HeaderOverflow) => return Err(self.too_large()),
                }
            }
            return Ok(None);
        }

        match codec.peek(input.as_slice()) {
            Ok(Some((len, header_len))) => {
                input.advance(header_len);
                self.check(len).map(Some)
            }
            Ok(None) => {
                if input.is_readable() {
                    let mut pending = ByteBuf::with_capacity(self.config.scheme.max_header_len() + 3);
                    pending.drain_from(input, None);
                    self.pending_header = Some(pending);
                }
                Ok(None)
            }
            Err(HeaderOverflow) => Err(self.too_large()),
        }
    }

    fn read_payload(&mut self, input: &mut ByteBuf, len: usize) -> Option<Chunk> {
        if let Some(pending) = self.pending_payload.as_mut() {
            let missing = len - pending.remaining();
            pending.drain_from(input, Some(missing));
            if pending.remaining() < len {
                return None;
            }
            return self.pending_payload.take().map(ByteBuf::freeze);
        }

        let available = input.remaining();
        if available == len {
            return Some(input.take_chunk(len));
        }
        if available > len {
            let payload = match self.config.slice_mode {
                SliceMode::ZeroCopy => input.take_chunk(len),
                SliceMode::Copy => {
                    let copy = Chunk::from(input.as_slice()[..len].to_vec());
                    input.advance(len);
                    copy
                }
            };
            return Some(payload);
        }

        if available == 0 {
            return None;
        }
        let mut pending = ByteBuf::with_capacity(len);
        pending.drain_from(input, None);
        self.pending_payload = Some(pending);
        None
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;
    use crate::{
        buffers::Bytes,
        codec::encoder::{EncoderConfig, FrameEncoder},
        protocol::Priority,
    };

    const SIZES: [usize; 5] = [0, 1, 32767, 32768, 1_000_000];

    fn encode_all(scheme: HeaderScheme, payloads: &[Vec<u8>]) -> Vec<u8> {
        let encoder = FrameEncoder::new(EncoderConfig::default().with_scheme(scheme));
        let mut wire = vec![];
        for p in payloads {
            let frame = encoder.encode_slice(p, Priority::DEFAULT).unwrap();
            wire.extend_from_slice(&frame.bytes().to_vec());
        }
        wire
    }

    fn payload(len: usize) -> Vec<u8> {
        let mut rng = rand::rng();
        (0..len).map(|_| rng.random()).collect()
    }

    // Feeds `wire` to a fresh decoder in reads of the given sizes.
    fn decode_split(config: DecoderConfig, wire: &[u8], mut split: impl FnMut() -> usize) -> Vec<Chunk> {
        let mut decoder = FrameDecoder::new(config);
        let mut frames = vec![];
        let mut offset = 0;
        while offset < wire.len() {
            let n = split().clamp(1, wire.len() - offset);
            let mut input = ByteBuf::from(&wire[offset..offset + n]);
            decoder.decode(&mut input, |f| frames.push(f)).unwrap();
            assert!(!input.is_readable());
            offset += n;
        }
        assert!(decoder.is_idle());
        frames
    }

    #[test]
    fn round_trip_sizes() {
        for scheme in [HeaderScheme::Varint, HeaderScheme::ShortLong] {
            for len in SIZES {
                println!("{scheme:?}: {len} bytes");
                let p = payload(len);
                let wire = encode_all(scheme, core::slice::from_ref(&p));

                let mut decoder = FrameDecoder::new(DecoderConfig::default().with_scheme(scheme));
                let mut frames = vec![];
                decoder
                    .decode(&mut ByteBuf::from(wire), |f| frames.push(f))
                    .unwrap();
                assert_eq!(frames.len(), 1);
                assert_eq!(frames[0], p);
            }
        }
    }

    #[test]
    fn fragmentation_invariance() {
        let mut rng = rand::rng();
        for scheme in [HeaderScheme::Varint, HeaderScheme::ShortLong] {
            let payloads: Vec<Vec<u8>> = (0..32).map(|_| payload(rng.random_range(0..40_000))).collect();
            let wire = encode_all(scheme, &payloads);
            let config = DecoderConfig::default().with_scheme(scheme);

            // Byte by byte
            let frames = decode_split(config, &wire, || 1);
            assert_eq!(frames, payloads);

            // Random splits
            for _ in 0..8 {
                let max = rng.random_range(1..64 * 1024);
                let frames = decode_split(config, &wire, || rand::rng().random_range(1..=max));
                assert_eq!(frames, payloads);
            }
        }
    }

    #[test]
    fn coalesced_reads() {
        for mode in [SliceMode::ZeroCopy, SliceMode::Copy] {
            let payloads: Vec<Vec<u8>> = (0..100).map(|i| payload(i % 7)).collect();
            let wire = encode_all(HeaderScheme::Varint, &payloads);

            let mut decoder = FrameDecoder::new(DecoderConfig::default().with_slice_mode(mode));
            let mut input = ByteBuf::from(wire);
            let mut frames = vec![];
            decoder.decode(&mut input, |f| frames.push(f)).unwrap();

            assert_eq!(frames, payloads);
            assert!(decoder.is_idle());
        }
    }

    #[test]
    fn slice_modes() {
        let wire = encode_all(HeaderScheme::Varint, &[b"ab".to_vec(), b"cd".to_vec()]);

        let mut decoder = FrameDecoder::default();
        let mut frames = vec![];
        let mut input = ByteBuf::from(wire.clone());
        decoder.decode(&mut input, |f| frames.push(f)).unwrap();
        assert!(frames[0].shares_storage(&frames[1]));

        let mut decoder = FrameDecoder::new(DecoderConfig::default().with_slice_mode(SliceMode::Copy));
        let mut frames = vec![];
        let mut input = ByteBuf::from(wire);
        decoder.decode(&mut input, |f| frames.push(f)).unwrap();
        assert!(!frames[0].shares_storage(&frames[1]));
        assert_eq!(frames, [b"ab", b"cd"]);
    }

    #[test]
    fn empty_frames() {
        let wire = encode_all(HeaderScheme::ShortLong, &[vec![], vec![], b"x".to_vec()]);
        let frames = decode_split(DecoderConfig::default().with_scheme(HeaderScheme::ShortLong), &wire, || 1);
        assert_eq!(frames.len(), 3);
        assert!(frames[0].is_empty());
        assert!(frames[1].is_empty());
        assert_eq!(frames[2], b"x");
    }

    #[test]
    fn pending_header_keeps_payload_out() {
        // Header 300 split 1 + 1, then 300 payload bytes
        let p = payload(300);
        let wire = encode_all(HeaderScheme::Varint, core::slice::from_ref(&p));
        assert_eq!(&wire[..2], &[0xAC, 0x02]);

        let mut decoder = FrameDecoder::default();
        let mut frames = vec![];
        decoder.decode(&mut ByteBuf::from(&wire[..1]), |f| frames.push(f)).unwrap();
        assert!(!decoder.is_idle());
        decoder.decode(&mut ByteBuf::from(&wire[1..150]), |f| frames.push(f)).unwrap();
        assert!(frames.is_empty());
        decoder.decode(&mut ByteBuf::from(&wire[150..]), |f| frames.push(f)).unwrap();
        assert_eq!(frames, [p]);
    }

    #[test]
    fn unterminated_varint() {
        let mut decoder = FrameDecoder::default();
        let mut input = ByteBuf::from(vec![0x80u8; 5]);
        assert!(matches!(
            decoder.decode(&mut input, |_| {}),
            Err(CodecError::FrameTooLarge { .. })
        ));

        // Same bytes, delivered one at a time
        let mut decoder = FrameDecoder::default();
        for _ in 0..4 {
            decoder.decode(&mut ByteBuf::from(vec![0x80u8]), |_| {}).unwrap();
        }
        assert!(matches!(
            decoder.decode(&mut ByteBuf::from(vec![0x80u8]), |_| {}),
            Err(CodecError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn max_frame_len() {
        let config = DecoderConfig::default().with_max_frame_len(10);
        let wire = encode_all(HeaderScheme::Varint, &[payload(10), payload(11)]);

        let mut decoder = FrameDecoder::new(config);
        let mut frames = vec![];
        let res = decoder.decode(&mut ByteBuf::from(wire), |f| frames.push(f));
        assert_eq!(frames.len(), 1);
        assert_eq!(res, Err(CodecError::FrameTooLarge { max: 10 }));
    }

    #[test]
    fn reset_drops_partial() {
        let wire = encode_all(HeaderScheme::Varint, &[payload(8)]);
        let mut decoder = FrameDecoder::default();
        decoder.decode(&mut ByteBuf::from(&wire[..4]), |_| {}).unwrap();
        assert!(!decoder.is_idle());
        decoder.reset();
        assert!(decoder.is_idle());

        let mut frames = vec![];
        decoder.decode(&mut ByteBuf::from(wire.as_slice()), |f| frames.push(f)).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn encoded_frame_decodes() {
        // Frames built from Bytes chunks decode to the original payload
        let encoder = FrameEncoder::default();
        let frame = encoder.encode(ByteBuf::from(b"framelane".to_vec())).unwrap();
        let wire: Bytes = frame.into_bytes();

        let mut decoder = FrameDecoder::default();
        let mut frames = vec![];
        for chunk in wire {
            decoder.decode(&mut ByteBuf::from(chunk), |f| frames.push(f)).unwrap();
        }
        assert_eq!(frames, [b"framelane"]);
    }
}
