//! Single consumer of every inbound connection.
//!
//! Each [`ReceiverTask`](crate::ReceiverTask) pushes what it decodes into a
//! shared [`Inbox`] through its [`InboxSender`]. Events of one connection are
//! delivered in stream order; events of different connections interleave.
use std::{
    collections::HashSet,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tracing::trace;

use crate::{
    buffers::Chunk,
    error::Error,
    handshake::Handshake,
    pipeline::channel::{self, ChannelReceiver, ChannelSender, RecvError, SendError},
};

/// Identifies one connection in the [`Inbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Returns a process-wide unique identifier.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a connection delivers to the [`Inbox`].
#[derive(Debug, Clone)]
pub enum Event {
    /// The text handshake of the connection, when it opens with one.
    Handshake { id: ConnectionId, handshake: Handshake },

    /// One frame payload.
    Frame { id: ConnectionId, payload: Chunk },

    /// The last event of a connection. `error` is set when the connection
    /// ended on a fatal error rather than a clean end of stream or stop.
    Closed { id: ConnectionId, error: Option<Error> },
}

impl Event {
    pub fn id(&self) -> ConnectionId {
        match self {
            Self::Handshake { id, .. } | Self::Frame { id, .. } | Self::Closed { id, .. } => *id,
        }
    }
}

/// Creates an inbox holding up to `capacity` undelivered events.
pub fn inbox(capacity: usize) -> (InboxSender, Inbox) {
    let (tx, rx) = channel::channel(capacity);
    (
        InboxSender { inner: tx },
        Inbox {
            inner: rx,
            closed: HashSet::new(),
        },
    )
}

/// Producing side of an [`Inbox`], one clone per receiver task.
#[derive(Clone)]
pub struct InboxSender {
    inner: ChannelSender<Event>,
}

impl InboxSender {
    /// Waits up to `timeout` for room in the inbox.
    pub(crate) async fn deliver(&self, event: Event, timeout: Duration) -> Result<(), SendError<Event>> {
        self.inner.send(event, timeout).await
    }

    /// Returns `true` once the [`Inbox`] has been dropped.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl fmt::Debug for InboxSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboxSender")
            .field("len", &self.inner.len())
            .field("capacity", &self.inner.capacity())
            .finish()
    }
}

/// Consuming side: events of every connection, in per-connection order.
pub struct Inbox {
    inner: ChannelReceiver<Event>,
    // Connections whose events are discarded
    closed: HashSet<ConnectionId>,
}

impl Inbox {
    /// Waits for the next event.
    ///
    /// # Errors
    ///
    /// [`RecvError::Closed`] once every [`InboxSender`] is gone and all their
    /// events have been received.
    pub async fn recv(&mut self) -> Result<Event, RecvError> {
        loop {
            let event = self.inner.recv().await?;
            if let Some(event) = self.admit(event) {
                return Ok(event);
            }
        }
    }

    /// Returns the next event if one is ready.
    pub fn try_recv(&mut self) -> Option<Event> {
        while let Some(event) = self.inner.try_recv() {
            if let Some(event) = self.admit(event) {
                return Some(event);
            }
        }
        None
    }

    /// Like [`recv`](Inbox::recv), failing with [`RecvError::Timeout`] after
    /// `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Event, RecvError> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| RecvError::Timeout)?
    }

    /// Discards every event of `id` from now on, including those already
    /// queued. The connection task itself is not affected: stop it through
    /// its [`ReceiverTask`](crate::ReceiverTask).
    pub fn close(&mut self, id: ConnectionId) {
        self.closed.insert(id);
    }

    /// Approximate number of queued events.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn admit(&mut self, event: Event) -> Option<Event> {
        let id = event.id();
        if !self.closed.contains(&id) {
            return Some(event);
        }
        // Nothing follows a close event: forget the connection
        if matches!(event, Event::Closed { .. }) {
            self.closed.remove(&id);
        }
        trace!(%id, "Discarded event of closed connection");
        None
    }
}

impl fmt::Debug for Inbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbox")
            .field("len", &self.inner.len())
            .field("closed", &self.closed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: ConnectionId, byte: u8) -> Event {
        Event::Frame {
            id,
            payload: Chunk::from(vec![byte]),
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn inbox_order_and_close() {
        let (tx, mut rx) = inbox(16);
        let (a, b) = (ConnectionId::next(), ConnectionId::next());
        assert_ne!(a, b);

        for i in 0..3 {
            tx.deliver(frame(a, i), TIMEOUT).await.unwrap();
            tx.deliver(frame(b, i), TIMEOUT).await.unwrap();
        }
        tx.deliver(Event::Closed { id: a, error: None }, TIMEOUT).await.unwrap();
        tx.deliver(Event::Closed { id: b, error: None }, TIMEOUT).await.unwrap();

        // Drop `a` while its events are still queued
        rx.close(a);

        let mut seen = vec![];
        while let Some(event) = rx.try_recv() {
            assert_eq!(event.id(), b);
            if let Event::Frame { payload, .. } = event {
                seen.push(payload[0]);
            }
        }
        assert_eq!(seen, [0, 1, 2]);
        // The close event of `a` released its entry
        assert!(rx.closed.is_empty());

        drop(tx);
        assert_eq!(rx.recv().await.unwrap_err(), RecvError::Closed);
    }

    #[tokio::test]
    async fn inbox_full() {
        let (tx, mut rx) = inbox(2);
        let id = ConnectionId::next();
        tx.deliver(frame(id, 0), TIMEOUT).await.unwrap();
        tx.deliver(frame(id, 1), TIMEOUT).await.unwrap();

        let res = tx.deliver(frame(id, 2), Duration::from_millis(10)).await;
        assert!(matches!(res, Err(SendError::Timeout(Event::Frame { .. }))));

        assert_eq!(rx.recv_timeout(TIMEOUT).await.unwrap().id(), id);
        tx.deliver(frame(id, 2), TIMEOUT).await.unwrap();

        drop(rx);
        assert!(tx.is_closed());
    }
}
