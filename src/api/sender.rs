//! Outbound half of a connection.
//!
//! [`Sender`] handles queue [`ByteBuf`] payloads into a bounded channel. A
//! background [`SenderTask`] drains the channel into a [`DrrScheduler`],
//! frames the scheduled payloads and writes them to the stream, so that
//! every priority class gets its share of the bandwidth however much the
//! others queue.
//!
//! ```no_run
//! use framelane::{ByteBuf, DrrConfig, Priority};
//! use tokio::net::TcpStream;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("127.0.0.1:8080").await?;
//! let (_reader, writer) = stream.into_split();
//!
//! let (control, bulk) = (Priority::new(0), Priority::new(1));
//! let (sender, task) = framelane::sender(writer)
//!     .drr(DrrConfig::default().with_class(control, 4.0).with_class(bulk, 1.0))
//!     .build();
//!
//! sender.send(ByteBuf::from(vec![0u8; 1 << 20]).with_priority(bulk)).await?;
//! sender.send(ByteBuf::from(&b"ping"[..]).with_priority(control)).await?;
//!
//! sender.stop();
//! let exit = task.stop().await?;
//! assert!(exit.error.is_none());
//! # Ok(())
//! # }
//! ```
#[cfg(feature = "stats")]
use std::sync::atomic::AtomicUsize;
use std::{
    fmt,
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use tokio::{
    io::{AsyncWriteExt, BufWriter},
    select,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::TaskExit;
use crate::{
    buffers::ByteBuf,
    codec::{EncoderConfig, Frame, FrameEncoder},
    error::Error,
    pipeline::channel::{self, ChannelReceiver, ChannelSender, SendError, TrySendError},
    sched::{DrrConfig, DrrScheduler},
    sync::AtomicDuration,
};

/// Handle queueing payloads for a [`SenderTask`].
///
/// Cheap to clone: every clone feeds the same connection. Payloads of one
/// handle and one priority are written in the order they were sent.
#[derive(Clone)]
pub struct Sender {
    inner: ChannelSender<ByteBuf>,
    timeout: Duration,
    token: CancellationToken,
}

impl Sender {
    /// Sets how long [`send`](Sender::send) waits for room in the queue.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    /// Queues `buf`, waiting for room while the queue is full.
    ///
    /// # Errors
    ///
    /// - [`SendError::Timeout`] if the queue stayed full for the whole timeout.
    /// - [`SendError::Closed`] if the task has terminated.
    ///
    /// The payload is handed back in both cases.
    pub async fn send(&self, buf: ByteBuf) -> Result<(), SendError<ByteBuf>> {
        if self.token.is_cancelled() {
            return Err(SendError::Closed(buf));
        }
        self.inner.send(buf, self.timeout).await
    }

    /// Queues `buf` if there is room right now.
    pub fn try_send(&self, buf: ByteBuf) -> Result<(), TrySendError<ByteBuf>> {
        if self.token.is_cancelled() {
            return Err(TrySendError::Closed(buf));
        }
        self.inner.try_send(buf)
    }

    /// Number of payloads waiting to reach the scheduler.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.inner.is_closed()
    }

    /// Asks the task to terminate after writing what is already queued.
    /// Affects every clone.
    pub fn stop(self) {
        self.token.cancel();
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("len", &self.inner.len())
            .field("capacity", &self.inner.capacity())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(feature = "stats")]
struct SenderTaskStats {
    frames_count: AtomicUsize,
    bytes_count: AtomicUsize,
    dropped: AtomicUsize,
}

#[cfg(feature = "stats")]
impl SenderTaskStats {
    fn new() -> Self {
        Self {
            frames_count: AtomicUsize::new(0),
            bytes_count: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }
}

struct SenderTaskInner {
    write_timeout: AtomicDuration,
    #[cfg(feature = "stats")]
    stats: SenderTaskStats,
}

/// Counters of a [`SenderTask`].
#[cfg(feature = "stats")]
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct SenderStats {
    /// Frames written.
    pub frames: usize,
    /// Bytes written, headers included.
    pub bytes: usize,
    /// Payloads refused by the encoder.
    pub dropped: usize,
}

/// Background task writing frames to the stream.
///
/// The task ends when it is stopped, when every [`Sender`] is dropped, or on
/// the first write error or timeout. It then hands back the writer in a
/// [`TaskExit`].
pub struct SenderTask<W> {
    handle: JoinHandle<TaskExit<W>>,
    token: CancellationToken,
    inner: Arc<SenderTaskInner>,
}

impl<W> SenderTask<W> {
    /// Sets how long writing one frame may take before the connection is
    /// considered dead.
    pub fn set_write_timeout(&self, timeout: Duration) {
        self.inner.write_timeout.store(timeout, Ordering::Relaxed);
    }

    #[cfg(feature = "stats")]
    pub fn get_stats(&self) -> SenderStats {
        SenderStats {
            frames: self.inner.stats.frames_count.load(Ordering::Relaxed),
            bytes: self.inner.stats.bytes_count.load(Ordering::Relaxed),
            dropped: self.inner.stats.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the task. Payloads already queued are still written.
    pub fn stop(self) -> JoinHandle<TaskExit<W>> {
        let Self {
            handle,
            token,
            inner: _,
        } = self;
        token.cancel();
        handle
    }
}

/// Configures and spawns a [`SenderTask`]. Created by [`sender`].
pub struct SenderBuilder<W>
where
    W: AsyncWriteExt + Send + Unpin + 'static,
{
    capacity: usize,
    drr: DrrConfig,
    encoder: EncoderConfig,
    timeout: Duration,
    write_timeout: Duration,
    write_buffer: usize,
    writer: W,
}

impl<W> SenderBuilder<W>
where
    W: AsyncWriteExt + Send + Unpin + 'static,
{
    /// Number of payloads queued between the [`Sender`] handles and the
    /// task. Rounded up to a power of two.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn drr(mut self, drr: DrrConfig) -> Self {
        self.drr = drr;
        self
    }

    /// Framing parameters. The peer decoder must use the same header scheme.
    #[must_use]
    pub fn encoder(mut self, encoder: EncoderConfig) -> Self {
        self.encoder = encoder;
        self
    }

    /// Default send timeout of the [`Sender`].
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Initial write timeout, see [`SenderTask::set_write_timeout`].
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Size of the buffer coalescing headers and small payloads into one
    /// write. It is flushed whenever the scheduler runs empty.
    #[must_use]
    pub fn write_buffer(mut self, size: usize) -> Self {
        self.write_buffer = size.max(1);
        self
    }

    #[must_use]
    pub fn build(self) -> (Sender, SenderTask<W>) {
        let Self {
            capacity,
            drr,
            encoder,
            timeout,
            write_timeout,
            write_buffer,
            writer,
        } = self;
        let (tx, rx) = channel::channel(capacity);

        let token = CancellationToken::new();
        let inner = Arc::new(SenderTaskInner {
            write_timeout: AtomicDuration::new(write_timeout),
            #[cfg(feature = "stats")]
            stats: SenderTaskStats::new(),
        });

        let handle = tokio::spawn(write_task(
            rx,
            BufWriter::with_capacity(write_buffer, writer),
            DrrScheduler::new(drr),
            FrameEncoder::new(encoder),
            inner.clone(),
            token.clone(),
        ));

        let sender = Sender {
            inner: tx,
            timeout,
            token: token.clone(),
        };
        (sender, SenderTask { handle, token, inner })
    }
}

async fn write_task<W>(
    mut rx: ChannelReceiver<ByteBuf>,
    mut writer: BufWriter<W>,
    mut drr: DrrScheduler<ByteBuf>,
    encoder: FrameEncoder,
    inner: Arc<SenderTaskInner>,
    token: CancellationToken,
) -> TaskExit<W>
where
    W: AsyncWriteExt + Send + Unpin + 'static,
{
    macro_rules! with_timeout {
        ($fut:expr) => {{
            let timeout = inner.write_timeout.load(Ordering::Relaxed);
            match tokio::time::timeout(timeout, $fut).await {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(Error::from(e)),
                Err(_) => Err(Error::Timeout),
            }
        }};
    }

    // Buffers the header then the payload views; large payloads bypass the buffer
    macro_rules! write_frame {
        ($frame:expr) => {{
            let frame: Frame = $frame;
            let res = with_timeout!(async {
                for s in frame.bytes().slices() {
                    writer.write_all(s).await?;
                }
                Ok::<_, std::io::Error>(frame.len())
            });
            #[cfg(feature = "stats")]
            {
                if let Ok(written) = res {
                    inner.stats.frames_count.fetch_add(1, Ordering::Relaxed);
                    inner.stats.bytes_count.fetch_add(written, Ordering::Relaxed);
                }
            }
            res
        }};
    }

    macro_rules! encode {
        ($buf:expr) => {
            match encoder.encode($buf) {
                Ok(frame) => frame,
                Err(e) => {
                    // Refused payloads are dropped, the connection goes on
                    error!(error = %e, "Dropping payload");
                    #[cfg(feature = "stats")]
                    inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            }
        };
    }

    let mut error = loop {
        // Move everything queued so far into the scheduler
        while let Some(buf) = rx.try_recv() {
            drr.push(buf);
        }

        if drr.is_empty() {
            // Idle: push buffered bytes out before parking
            if let Err(e) = with_timeout!(writer.flush()) {
                break Some(e);
            }
            select! {
                res = rx.recv() => match res {
                    Ok(buf) => {
                        drr.push(buf);
                        continue;
                    }
                    // Every sender is gone
                    Err(_) => break None,
                },
                _ = token.cancelled() => break None,
            }
        }

        let Some(buf) = drr.pull() else {
            continue;
        };
        let frame = encode!(buf);
        if let Err(e) = write_frame!(frame) {
            break Some(e);
        }
    };

    if error.is_none() {
        // Graceful shutdown: write what is still queued
        debug!("Draining sender");
        while let Some(buf) = rx.try_recv() {
            drr.push(buf);
        }
        while let Some(buf) = drr.pull() {
            let frame = encode!(buf);
            if let Err(e) = write_frame!(frame) {
                error = Some(e);
                break;
            }
        }
        if error.is_none() {
            error = with_timeout!(writer.flush()).err();
        }
    }

    if let Some(e) = error.as_ref() {
        error!(error = %e, dropped = drr.len(), "Sender terminated");
    }
    drr.clear();
    TaskExit {
        io: writer.into_inner(),
        error,
    }
}

/// Creates a [`SenderBuilder`] writing to `writer`.
///
/// Defaults: 64 queued payloads, a single DRR class with a 4096 byte quantum,
/// varint headers with a 16 MiB frame limit, an 8 KiB write buffer, a 60 s
/// send timeout and a 10 s write timeout.
pub fn sender<W>(writer: W) -> SenderBuilder<W>
where
    W: AsyncWriteExt + Send + Unpin + 'static,
{
    SenderBuilder {
        capacity: 64,
        drr: DrrConfig::default(),
        encoder: EncoderConfig::default(),
        timeout: Duration::from_secs(60),
        write_timeout: Duration::from_secs(10),
        write_buffer: 8 * 1024,
        writer,
    }
}
