use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

// Nanoseconds in a u64 cover about 584 years: longer durations saturate.
fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// A [`Duration`] that can be read and updated concurrently.
///
/// Used for timeouts that can be changed while a task is running.
pub(crate) struct AtomicDuration(AtomicU64);

impl AtomicDuration {
    pub(crate) fn new(duration: Duration) -> Self {
        Self(AtomicU64::new(duration_to_nanos(duration)))
    }

    pub(crate) fn store(&self, duration: Duration, order: Ordering) {
        self.0.store(duration_to_nanos(duration), order);
    }

    pub(crate) fn load(&self, order: Ordering) -> Duration {
        Duration::from_nanos(self.0.load(order))
    }
}

impl std::fmt::Debug for AtomicDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.load(Ordering::Relaxed))
    }
}
