use std::{sync::LazyLock, time::Duration};

pub(crate) mod channel;
pub(crate) mod ringbuf;

pub(crate) static LOCAL_EPOCH: LazyLock<quanta::Instant> = LazyLock::new(quanta::Instant::now);

/// Time left out of `timeout` since `start`, both measured on [`LOCAL_EPOCH`].
pub(crate) fn time_left(start: Duration, timeout: Duration) -> Option<Duration> {
    LOCAL_EPOCH
        .elapsed()
        .checked_sub(start)
        .and_then(|elapsed| timeout.checked_sub(elapsed))
}
