use std::{fmt, sync::Arc, time::Duration};

use event_listener::Event as EventLib;
use thiserror::Error;

use super::{
    LOCAL_EPOCH,
    ringbuf::{Consumer, Producer, mpsc_queue},
    time_left,
};
use crate::sync::event::{self, Notifier, Waiter};

/// Error returned by a non-blocking send. The rejected item is handed back.
#[derive(Error, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The queue is full.
    ///
    /// This is backpressure, not a failure: the consumer is slower than the
    /// producers. Retry later or use the waiting `send`.
    #[error("The queue is full")]
    Full(T),

    /// The consuming side is gone.
    ///
    /// Terminal: every later send fails the same way.
    #[error("The queue is closed")]
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Takes back the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(t) | Self::Closed(t) => t,
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

/// Error returned by a waiting send. The rejected item is handed back.
#[derive(Error, PartialEq, Eq)]
pub enum SendError<T> {
    /// The queue stayed full for the whole send timeout.
    ///
    /// The consumer is not keeping up. This is not terminal: the item can be
    /// sent again, dropped, or the application can slow down.
    #[error("Timed out waiting for room in the queue")]
    Timeout(T),

    /// The consuming side is gone.
    ///
    /// Usually the connection task has terminated. Terminal: a new
    /// connection is needed to continue sending.
    #[error("The queue is closed")]
    Closed(T),
}

impl<T> SendError<T> {
    /// Takes back the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            Self::Timeout(t) | Self::Closed(t) => t,
        }
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(_) => f.write_str("Timeout(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

/// Error returned when a receive operation fails.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// Nothing arrived within the receive timeout.
    ///
    /// Not terminal: later receive operations may succeed.
    #[error("Timed out while waiting for new data")]
    Timeout,

    /// Every producer is gone and everything they sent has been received.
    ///
    /// Terminal: no receive operation will succeed afterwards.
    #[error("The channel has been closed and no more data can be received")]
    Closed,
}

// Producers park here while the queue is full
struct Shared {
    room: EventLib,
}

/// Async channel on top of [`mpsc_queue`]: the consumer parks until data is
/// available and producers park until room is available.
pub(crate) fn channel<T>(capacity: usize) -> (ChannelSender<T>, ChannelReceiver<T>) {
    let (producer, consumer) = mpsc_queue(capacity);
    let (notifier, waiter) = event::new();
    let shared = Arc::new(Shared { room: EventLib::new() });
    (
        ChannelSender {
            producer,
            data: notifier,
            shared: shared.clone(),
        },
        ChannelReceiver {
            consumer,
            data: waiter,
            shared,
        },
    )
}

pub(crate) struct ChannelSender<T> {
    producer: Producer<T>,
    data: Notifier,
    shared: Arc<Shared>,
}

impl<T> Clone for ChannelSender<T> {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
            data: self.data.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T> ChannelSender<T> {
    pub(crate) fn try_send(&self, t: T) -> Result<(), TrySendError<T>> {
        if self.data.is_closed() {
            return Err(TrySendError::Closed(t));
        }
        self.producer.offer(t).map_err(TrySendError::Full)?;
        // A closed waiter is detected on the next send
        let _ = self.data.notify();
        Ok(())
    }

    /// Sends `t`, waiting up to `timeout` for room in the queue.
    pub(crate) async fn send(&self, mut t: T, timeout: Duration) -> Result<(), SendError<T>> {
        let start = LOCAL_EPOCH.elapsed();

        macro_rules! try_or_return {
            () => {
                match self.try_send(t) {
                    Ok(()) => return Ok(()),
                    Err(TrySendError::Closed(t)) => return Err(SendError::Closed(t)),
                    Err(TrySendError::Full(back)) => t = back,
                }
            };
        }

        loop {
            try_or_return!();

            // Register before checking again so that no wake-up is missed
            let listener = self.shared.room.listen();
            try_or_return!();

            let Some(left) = time_left(start, timeout) else {
                return Err(SendError::Timeout(t));
            };
            if tokio::time::timeout(left, listener).await.is_err() {
                return Err(SendError::Timeout(t));
            }
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.data.is_closed()
    }

    pub(crate) fn len(&self) -> usize {
        self.producer.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.producer.capacity()
    }
}

pub(crate) struct ChannelReceiver<T> {
    consumer: Consumer<T>,
    data: Waiter,
    shared: Arc<Shared>,
}

impl<T> ChannelReceiver<T> {
    pub(crate) fn try_recv(&mut self) -> Option<T> {
        let t = self.consumer.poll()?;
        self.shared.room.notify(1);
        Some(t)
    }

    /// Waits for the next item. Items sent before the last sender was
    /// dropped are all delivered before [`RecvError::Closed`].
    pub(crate) async fn recv(&mut self) -> Result<T, RecvError> {
        loop {
            if let Some(t) = self.try_recv() {
                return Ok(t);
            }
            if self.data.wait().await.is_err() {
                return self.try_recv().ok_or(RecvError::Closed);
            }
        }
    }

    pub(crate) async fn recv_timeout(&mut self, timeout: Duration) -> Result<T, RecvError> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| RecvError::Timeout)?
    }

    pub(crate) fn len(&self) -> usize {
        self.consumer.len()
    }
}

impl<T> Drop for ChannelReceiver<T> {
    fn drop(&mut self) {
        // Parked producers must observe the closed channel. The waiter is
        // dropped after this body runs: mark it closed first.
        self.data.close();
        self.shared.room.notify(usize::MAX);
    }
}
