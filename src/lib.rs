//! Framelane turns async byte streams into streams of discrete frames and
//! shares the outbound bandwidth of a connection fairly between priority
//! classes.
//!
//! Inbound, an arbitrarily fragmented byte stream is reassembled into
//! length-prefixed frames: partial reads, coalesced reads and frames split
//! across any number of reads are all handled, and payloads are handed out as
//! zero-copy views over the read buffers. Outbound, payloads tagged with a
//! [`Priority`] are interleaved with deficit round robin (DRR) so that a large
//! backlog of bulk data never monopolizes the connection, then written with
//! their length prefix. A connection may optionally open with a small text
//! handshake (request line and header fields) before the framed stream.
//!
//! # Architecture
//!
//! ```text
//!  AsyncRead ─► ReceiverTask ─► [HandshakeParser] ─► FrameDecoder ─► Inbox
//!  Sender ─► queue ─► SenderTask ─► DrrScheduler ─► FrameEncoder ─► AsyncWrite
//! ```
//!
//! - **[`ByteBuf`]**: growable buffer with read and write cursors. Slicing is
//!   zero-copy and writes after slicing never alter handed out [`Chunk`]s.
//! - **[`FrameEncoder`] / [`FrameDecoder`]**: length-prefix framing with a
//!   varint or a short/long header, see [`HeaderScheme`].
//! - **[`mpsc_queue`]**: bounded lock-free multi-producer single-consumer
//!   ring, the only structure shared between threads.
//! - **[`DrrScheduler`]**: deficit round robin across priority classes.
//! - **[`HandshakeParser`]**: CRLF line reassembly into a [`Handshake`].
//! - **[`sender`] / [`receiver`]**: tokio tasks driving a connection, and the
//!   shared [`Inbox`] collecting what every connection receives.
//!
//! # Wire format
//!
//! Every frame is a header carrying the payload length followed by the
//! payload. Both ends must be configured with the same scheme:
//!
//! - [`HeaderScheme::Varint`] (default): 7 bits per byte, least significant
//!   group first, `0x80` as continuation bit, at most 5 bytes.
//! - [`HeaderScheme::ShortLong`]: 2 bytes big-endian up to `32767`, otherwise
//!   4 bytes big-endian with the top bit set.
//!
//! # Example
//!
//! ```no_run
//! use framelane::{ByteBuf, Event, Priority};
//! use tokio::net::TcpStream;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("127.0.0.1:8080").await?;
//! let (reader, writer) = stream.into_split();
//!
//! let (sender, _sender_task) = framelane::sender(writer).build();
//! let (tx, mut inbox) = framelane::inbox(256);
//! let _receiver_task = framelane::receiver(reader, tx).build();
//!
//! sender.send(ByteBuf::from(&b"hello"[..]).with_priority(Priority::new(1))).await?;
//!
//! while let Ok(event) = inbox.recv().await {
//!     match event {
//!         Event::Frame { payload, .. } => println!("{:?}", payload),
//!         Event::Closed { error, .. } => {
//!             println!("closed: {error:?}");
//!             break;
//!         }
//!         Event::Handshake { .. } => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Fairness
//!
//! Each class of the [`DrrConfig`] receives `base_quantum * weight` bytes of
//! credit per round and sends queued payloads while they fit in its credit.
//! Unspent credit carries over to the next round as long as the class has
//! something queued, so a payload larger than the quantum is sent after a few
//! rounds instead of blocking forever. Payloads keep their order within a
//! class.
//!
//! # Logging
//!
//! The crate emits [`tracing`] events: `debug` for connection state changes,
//! `warn` for dropped events and `error` for fatal connection errors. It never
//! installs a subscriber.
mod api;
mod buffers;
mod codec;
mod error;
mod handshake;
mod pipeline;
mod protocol;
mod sched;
mod sync;

pub use api::*;
pub use buffers::{BufferError, bytes::*, chunk::*, cursor::*};
pub use codec::{CodecError, HeaderScheme, decoder::*, encoder::*};
pub use error::{Error, Result};
pub use handshake::*;
pub use pipeline::{
    channel::{RecvError, SendError, TrySendError},
    ringbuf::{Consumer, Producer, mpsc_queue},
};
pub use protocol::Priority;
pub use sched::*;
