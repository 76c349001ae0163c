//! Inbound half of a connection.
//!
//! A [`ReceiverTask`] reads the stream, optionally parses a text handshake,
//! decodes frames and delivers everything to an [`Inbox`](crate::Inbox)
//! tagged with the connection id. Several receiver tasks usually share one
//! inbox.
//!
//! ```no_run
//! use framelane::Event;
//! use tokio::net::TcpListener;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (tx, mut inbox) = framelane::inbox(1024);
//!
//! let listener = TcpListener::bind("127.0.0.1:8080").await?;
//! let (stream, _) = listener.accept().await?;
//! let (reader, _writer) = stream.into_split();
//! let _task = framelane::receiver(reader, tx).handshake(true).build();
//!
//! loop {
//!     match inbox.recv().await? {
//!         Event::Handshake { id, handshake } => println!("{id}: {}", handshake.request_line()),
//!         Event::Frame { id, payload } => println!("{id}: {} bytes", payload.len()),
//!         Event::Closed { id, error } => println!("{id}: closed ({error:?})"),
//!     }
//! }
//! # }
//! ```
#[cfg(feature = "stats")]
use std::sync::atomic::AtomicUsize;
use std::{
    io,
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use tokio::{io::AsyncReadExt, select, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{ConnectionId, Event, InboxSender, TaskExit};
use crate::{
    buffers::{ByteBuf, Chunk},
    codec::{DecoderConfig, FrameDecoder},
    error::Error,
    handshake::HandshakeParser,
    pipeline::channel::SendError,
    sync::AtomicDuration,
};

#[cfg(feature = "stats")]
struct ReceiverTaskStats {
    frames_count: AtomicUsize,
    bytes_count: AtomicUsize,
    dropped: AtomicUsize,
}

#[cfg(feature = "stats")]
impl ReceiverTaskStats {
    fn new() -> Self {
        Self {
            frames_count: AtomicUsize::new(0),
            bytes_count: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }
}

struct ReceiverTaskInner {
    read_timeout: AtomicDuration,
    deliver_timeout: AtomicDuration,
    #[cfg(feature = "stats")]
    stats: ReceiverTaskStats,
}

/// Counters of a [`ReceiverTask`].
#[cfg(feature = "stats")]
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct ReceiverStats {
    /// Frames decoded.
    pub frames: usize,
    /// Bytes read from the stream.
    pub bytes: usize,
    /// Events dropped because the inbox stayed full.
    pub dropped: usize,
}

/// Background task reading one connection.
///
/// The task ends on end of stream, on [`stop`](ReceiverTask::stop), when the
/// inbox is dropped, or on the first fatal error. Except for the inbox being
/// gone, it always delivers a final [`Event::Closed`].
pub struct ReceiverTask<R> {
    id: ConnectionId,
    handle: JoinHandle<TaskExit<R>>,
    token: CancellationToken,
    inner: Arc<ReceiverTaskInner>,
}

impl<R> ReceiverTask<R> {
    /// Identifier carried by the events of this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Sets how long the task waits for data before giving up on the
    /// connection.
    pub fn set_read_timeout(&self, timeout: Duration) {
        self.inner.read_timeout.store(timeout, Ordering::Relaxed);
    }

    /// Sets how long the task waits for room in a full inbox before dropping
    /// an event.
    pub fn set_deliver_timeout(&self, timeout: Duration) {
        self.inner.deliver_timeout.store(timeout, Ordering::Relaxed);
    }

    #[cfg(feature = "stats")]
    pub fn get_stats(&self) -> ReceiverStats {
        ReceiverStats {
            frames: self.inner.stats.frames_count.load(Ordering::Relaxed),
            bytes: self.inner.stats.bytes_count.load(Ordering::Relaxed),
            dropped: self.inner.stats.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn stop(self) -> JoinHandle<TaskExit<R>> {
        let Self {
            id: _,
            handle,
            token,
            inner,
        } = self;
        token.cancel();
        // A pending read gives up right away
        inner.read_timeout.store(Duration::ZERO, Ordering::Relaxed);
        handle
    }
}

/// Configures and spawns a [`ReceiverTask`]. Created by [`receiver`].
pub struct ReceiverBuilder<R>
where
    R: AsyncReadExt + Send + Unpin + 'static,
{
    id: ConnectionId,
    handshake: bool,
    decoder: DecoderConfig,
    read_buffer: usize,
    timeout: Duration,
    deliver_timeout: Duration,
    inbox: InboxSender,
    reader: R,
}

impl<R> ReceiverBuilder<R>
where
    R: AsyncReadExt + Send + Unpin + 'static,
{
    /// Overrides the generated connection id.
    #[must_use]
    pub fn id(mut self, id: ConnectionId) -> Self {
        self.id = id;
        self
    }

    /// Whether the stream opens with a text handshake.
    #[must_use]
    pub fn handshake(mut self, handshake: bool) -> Self {
        self.handshake = handshake;
        self
    }

    /// Framing parameters. The peer encoder must use the same header scheme.
    #[must_use]
    pub fn decoder(mut self, decoder: DecoderConfig) -> Self {
        self.decoder = decoder;
        self
    }

    /// Number of bytes asked from the stream per read.
    #[must_use]
    pub fn read_buffer(mut self, read_buffer: usize) -> Self {
        self.read_buffer = read_buffer.max(1);
        self
    }

    /// Initial read timeout, see [`ReceiverTask::set_read_timeout`].
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Initial deliver timeout, see [`ReceiverTask::set_deliver_timeout`].
    #[must_use]
    pub fn deliver_timeout(mut self, timeout: Duration) -> Self {
        self.deliver_timeout = timeout;
        self
    }

    #[must_use]
    pub fn build(self) -> ReceiverTask<R> {
        let Self {
            id,
            handshake,
            decoder,
            read_buffer,
            timeout,
            deliver_timeout,
            inbox,
            reader,
        } = self;

        let token = CancellationToken::new();
        let inner = Arc::new(ReceiverTaskInner {
            read_timeout: AtomicDuration::new(timeout),
            deliver_timeout: AtomicDuration::new(deliver_timeout),
            #[cfg(feature = "stats")]
            stats: ReceiverTaskStats::new(),
        });

        let task = ReadTask {
            id,
            inbox,
            decoder: FrameDecoder::new(decoder),
            handshake: handshake.then(HandshakeParser::new),
            read_buffer,
            inner: inner.clone(),
        };
        let handle = tokio::spawn(task.run(reader, token.clone()));

        ReceiverTask {
            id,
            handle,
            token,
            inner,
        }
    }
}

enum Delivery {
    Done,
    Dropped,
    // The inbox is gone
    Closed,
}

struct ReadTask {
    id: ConnectionId,
    inbox: InboxSender,
    decoder: FrameDecoder,
    handshake: Option<HandshakeParser>,
    read_buffer: usize,
    inner: Arc<ReceiverTaskInner>,
}

impl ReadTask {
    async fn deliver(&self, event: Event) -> Delivery {
        let timeout = self.inner.deliver_timeout.load(Ordering::Relaxed);
        match self.inbox.deliver(event, timeout).await {
            Ok(()) => Delivery::Done,
            Err(SendError::Timeout(event)) => {
                warn!(id = %self.id, event = ?event, "Inbox full, dropping event");
                #[cfg(feature = "stats")]
                self.inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Delivery::Dropped
            }
            Err(SendError::Closed(_)) => Delivery::Closed,
        }
    }

    // Handshake first, then frames. Every byte of `buf` is consumed.
    fn decode(&mut self, buf: &mut ByteBuf, events: &mut Vec<Event>) -> Result<(), Error> {
        if let Some(parser) = self.handshake.as_mut() {
            match parser.decode(buf)? {
                Some(handshake) => {
                    events.push(Event::Handshake { id: self.id, handshake });
                    self.handshake = None;
                }
                None => return Ok(()),
            }
        }

        let id = self.id;
        self.decoder
            .decode(buf, |payload: Chunk| events.push(Event::Frame { id, payload }))?;
        Ok(())
    }

    // What the end of the stream means in the current state
    fn finish(&mut self, events: &mut Vec<Event>) -> Option<Error> {
        if let Some(mut parser) = self.handshake.take() {
            match parser.finish() {
                Ok(handshake) => events.push(Event::Handshake { id: self.id, handshake }),
                // Nothing but a partial request line arrived
                Err(e) => return Some(e.into()),
            }
        }
        if !self.decoder.is_idle() {
            self.decoder.reset();
            return Some(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        None
    }

    async fn run<R>(mut self, mut reader: R, token: CancellationToken) -> TaskExit<R>
    where
        R: AsyncReadExt + Send + Unpin + 'static,
    {
        let mut buf = ByteBuf::with_capacity(self.read_buffer);
        let mut events = Vec::new();
        debug!(id = %self.id, "Receiver started");

        let error = 'conn: loop {
            let read_timeout = self.inner.read_timeout.load(Ordering::Relaxed);
            let storage = buf.storage_mut();
            storage.reserve(self.read_buffer);
            let res = select! {
                res = tokio::time::timeout(read_timeout, reader.read_buf(storage)) => res,
                _ = token.cancelled() => break None,
            };

            let eof = match res {
                Ok(Ok(0)) => true,
                Ok(Ok(_n)) => {
                    #[cfg(feature = "stats")]
                    self.inner.stats.bytes_count.fetch_add(_n, Ordering::Relaxed);
                    false
                }
                Ok(Err(e)) => break Some(e.into()),
                Err(_) => break Some(Error::Timeout),
            };

            let failure = if eof {
                self.finish(&mut events)
            } else {
                self.decode(&mut buf, &mut events).err()
            };
            buf.clear();

            for event in events.drain(..) {
                #[cfg(feature = "stats")]
                {
                    if matches!(event, Event::Frame { .. }) {
                        self.inner.stats.frames_count.fetch_add(1, Ordering::Relaxed);
                    }
                }
                if let Delivery::Closed = self.deliver(event).await {
                    debug!(id = %self.id, "Inbox closed");
                    return TaskExit {
                        io: reader,
                        error: Some(Error::Closed),
                    };
                }
            }

            if failure.is_some() || eof {
                break 'conn failure;
            }
        };

        match error.as_ref() {
            Some(e) => error!(id = %self.id, error = %e, "Receiver terminated"),
            None => debug!(id = %self.id, "Receiver closed"),
        }
        let closed = Event::Closed {
            id: self.id,
            error: error.clone(),
        };
        self.deliver(closed).await;
        TaskExit { io: reader, error }
    }
}

/// Creates a [`ReceiverBuilder`] reading from `reader` and delivering to
/// `inbox`.
///
/// Defaults: a fresh [`ConnectionId`], no handshake, varint headers with a
/// 16 MiB frame limit, zero-copy payloads, 8 KiB reads, no read timeout and a
/// 60 s deliver timeout.
#[must_use]
pub fn receiver<R>(reader: R, inbox: InboxSender) -> ReceiverBuilder<R>
where
    R: AsyncReadExt + Send + Unpin + 'static,
{
    ReceiverBuilder {
        id: ConnectionId::next(),
        handshake: false,
        decoder: DecoderConfig::default(),
        read_buffer: 8 * 1024,
        timeout: Duration::MAX,
        deliver_timeout: Duration::from_secs(60),
        inbox,
        reader,
    }
}
