use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicUsize, Ordering},
    },
};

use event_listener::{Event as EventLib, IntoNotification};

/// Error returned when a wait operation fails because all notifiers have been dropped.
pub(crate) struct WaitError;

impl fmt::Debug for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("No notifier available")
    }
}

/// Error returned when a notify operation fails because the waiter has been dropped.
pub(crate) struct NotifyError;

impl fmt::Debug for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("No waiter available")
    }
}

/// Shared state between the notifiers and the waiter.
struct EventInner {
    event: EventLib,
    flag: AtomicU8,
    // Live notifiers, the event errors out when it drops to zero
    notifiers: AtomicUsize,
}

/// No notification pending.
const UNSET: u8 = 0;
/// A notification is pending.
const OK: u8 = 1 << 0;
/// One side is gone.
const ERR: u8 = 1 << 1;

enum EventCheck {
    Unset,
    Ok,
    Err,
}

impl EventInner {
    /// Checks and atomically clears the OK flag.
    fn check(&self) -> EventCheck {
        let f = self.flag.fetch_and(!OK, Ordering::AcqRel);
        if f & ERR != 0 {
            return EventCheck::Err;
        }
        if f == OK {
            return EventCheck::Ok;
        }
        EventCheck::Unset
    }

    /// Atomically sets the OK flag. Fails once the event is closed.
    fn set(&self) -> Result<(), NotifyError> {
        let f = self.flag.fetch_or(OK, Ordering::AcqRel);
        if f & ERR != 0 {
            return Err(NotifyError);
        }
        Ok(())
    }

    fn err(&self) {
        self.flag.store(ERR, Ordering::Release);
        self.event.notify(usize::MAX);
    }

    fn is_err(&self) -> bool {
        self.flag.load(Ordering::Acquire) & ERR != 0
    }
}

/// Creates a many-to-one wake-up event.
///
/// Notifications do not queue: any number of `notify` calls before the waiter
/// checks collapse into one wake-up. The waiter is therefore expected to
/// drain whatever it is waiting on after each wake-up.
pub(crate) fn new() -> (Notifier, Waiter) {
    let inner = Arc::new(EventInner {
        event: EventLib::new(),
        flag: AtomicU8::new(UNSET),
        notifiers: AtomicUsize::new(1),
    });
    (Notifier(inner.clone()), Waiter(inner))
}

#[repr(transparent)]
pub(crate) struct Notifier(Arc<EventInner>);

impl Notifier {
    #[inline]
    pub(crate) fn notify(&self) -> Result<(), NotifyError> {
        self.0.set()?;
        self.0.event.notify(1.additional().relaxed());
        Ok(())
    }

    /// Returns `true` once the waiter is gone.
    pub(crate) fn is_closed(&self) -> bool {
        self.0.is_err()
    }
}

impl Clone for Notifier {
    fn clone(&self) -> Self {
        self.0.notifiers.fetch_add(1, Ordering::Relaxed);
        Self(self.0.clone())
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        // The last notifier has been dropped, close the event
        if self.0.notifiers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.err();
        }
    }
}

#[repr(transparent)]
pub(crate) struct Waiter(Arc<EventInner>);

impl Waiter {
    /// Resolves on the next notification, or fails once every notifier has
    /// been dropped.
    pub(crate) async fn wait(&self) -> Result<(), WaitError> {
        loop {
            match self.0.check() {
                EventCheck::Ok => return Ok(()),
                EventCheck::Unset => {}
                EventCheck::Err => return Err(WaitError),
            }

            let listener = self.0.event.listen();

            match self.0.check() {
                EventCheck::Ok => return Ok(()),
                EventCheck::Unset => {}
                EventCheck::Err => return Err(WaitError),
            }

            listener.await;
        }
    }

    /// Closes the event: notifiers fail from now on.
    pub(crate) fn close(&self) {
        self.0.err();
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.0.err();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn notify_wakes_waiter() {
        let (notifier, waiter) = new();

        let wait_task = tokio::spawn(async move {
            waiter.wait().await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        notifier.notify().unwrap();

        wait_task.await.unwrap();
    }

    #[tokio::test]
    async fn notifications_collapse() {
        let (notifier, waiter) = new();

        notifier.notify().unwrap();
        notifier.notify().unwrap();
        notifier.notify().unwrap();

        let result = timeout(Duration::from_millis(100), waiter.wait()).await;
        assert!(result.unwrap().is_ok());

        // Only one wake-up was pending
        let result = timeout(Duration::from_millis(50), waiter.wait()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn last_notifier_closes() {
        let (notifier, waiter) = new();
        let other = notifier.clone();

        drop(notifier);
        let result = timeout(Duration::from_millis(50), waiter.wait()).await;
        assert!(result.is_err(), "A notifier is still alive");

        let wait_task = tokio::spawn(async move { waiter.wait().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(other);

        let result = wait_task.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn dropped_waiter_closes() {
        let (notifier, waiter) = new();
        assert!(!notifier.is_closed());

        drop(waiter);

        assert!(notifier.is_closed());
        assert!(notifier.notify().is_err());
    }
}
