use std::{
    cell::UnsafeCell,
    fmt,
    mem::MaybeUninit,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crossbeam_utils::CachePadded;

// Every slot carries a sequence stamp telling who may touch it next:
// - `seq == pos`: free, the producer claiming `pos` may write it
// - `seq == pos + 1`: written, the consumer at `pos` may read it
// - after the read the stamp moves to `pos + capacity`, one lap ahead
struct Slot<T> {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Internal ringbuffer storage shared by all producers and the consumer.
///
/// Positions grow indefinitely, wrapping on overflow, and are turned into
/// slot indices with a power-of-two mask.
struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    // Next position to read, only ever advanced by the consumer
    head: CachePadded<AtomicUsize>,
    // Next position to claim, shared by producers
    tail: CachePadded<AtomicUsize>,
}

// SAFETY: a slot value is only accessed by the producer that claimed its
// position or by the single consumer, hand-over is ordered through `seq`.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two() && capacity >= 2);
        let slots = (0..capacity)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    fn slot(&self, pos: usize) -> &Slot<T> {
        // SAFETY: the mask keeps the index below the number of slots.
        unsafe { self.slots.get_unchecked(pos & self.mask) }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head).min(self.capacity())
    }

    fn offer(&self, t: T) -> Result<(), T> {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = self.slot(pos);
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                // The slot is free for this lap: try to claim the position
                match self
                    .tail
                    .compare_exchange_weak(pos, pos.wrapping_add(1), Ordering::Relaxed, Ordering::Relaxed)
                {
                    Ok(_) => {
                        // SAFETY: the successful CAS grants exclusive access to the slot
                        // until its stamp is published.
                        unsafe { (*slot.value.get()).write(t) };
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // The consumer has not freed the slot yet: full
                return Err(t);
            } else {
                // Another producer claimed the position
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    // SAFETY: must only be called by the single consumer, with `pos` being
    // the current head.
    unsafe fn poll(&self, pos: usize) -> Option<T> {
        let slot = self.slot(pos);
        let seq = slot.seq.load(Ordering::Acquire);
        if seq != pos.wrapping_add(1) {
            return None;
        }
        // SAFETY: the stamp says the producer finished writing the value.
        let t = unsafe { (*slot.value.get()).assume_init_read() };
        slot.seq.store(pos.wrapping_add(self.capacity()), Ordering::Release);
        self.head.store(pos.wrapping_add(1), Ordering::Release);
        Some(t)
    }
}

// Stored inside an `Arc`: dropped when the last producer or the consumer is
// dropped, whichever comes last.
impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        let mut pos = *self.head.get_mut();
        loop {
            let capacity = self.capacity();
            let slot = &mut self.slots[pos & self.mask];
            if *slot.seq.get_mut() != pos.wrapping_add(1) {
                break;
            }
            // SAFETY: no other handle exists and the stamp says the value is
            // initialized: drop it exactly once.
            unsafe { slot.value.get_mut().assume_init_drop() };
            *slot.seq.get_mut() = pos.wrapping_add(capacity);
            pos = pos.wrapping_add(1);
        }
    }
}

/// Creates a bounded multi-producer single-consumer queue.
///
/// `capacity` is rounded up to the next power of two (and to at least 2).
/// Neither side ever blocks: [`Producer::offer`] hands the item back when the
/// queue is full and [`Consumer::poll`] returns `None` when it is empty.
///
/// ```
/// let (producer, mut consumer) = framelane::mpsc_queue::<u32>(3);
/// assert_eq!(producer.capacity(), 4);
///
/// let other = producer.clone();
/// producer.offer(1).unwrap();
/// other.offer(2).unwrap();
///
/// assert_eq!(consumer.poll(), Some(1));
/// assert_eq!(consumer.poll(), Some(2));
/// assert_eq!(consumer.poll(), None);
/// ```
pub fn mpsc_queue<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let capacity = capacity.max(2).next_power_of_two();
    let inner = Arc::new(RingBuffer::new(capacity));
    (Producer { inner: inner.clone() }, Consumer { inner, head: 0 })
}

/// Producing half of [`mpsc_queue`]. Cheap to clone, shareable across threads.
pub struct Producer<T> {
    inner: Arc<RingBuffer<T>>,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Producer<T> {
    /// Enqueues `t`, or gives it back if the queue is full.
    ///
    /// Items offered by the same producer are polled in the order they were
    /// offered.
    #[inline]
    pub fn offer(&self, t: T) -> Result<(), T> {
        self.inner.offer(t)
    }

    /// Approximate number of queued items.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Consuming half of [`mpsc_queue`]. There is exactly one per queue.
pub struct Consumer<T> {
    inner: Arc<RingBuffer<T>>,
    head: usize,
}

impl<T> Consumer<T> {
    /// Dequeues the oldest item, if any.
    #[inline]
    pub fn poll(&mut self) -> Option<T> {
        // SAFETY: `&mut self` makes this the only consumer call in flight and
        // `self.head` tracks the published head.
        let t = unsafe { self.inner.poll(self.head) }?;
        self.head = self.head.wrapping_add(1);
        Some(t)
    }

    /// Approximate number of queued items.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn capacity_rounding() {
        for (asked, expected) in [(0, 2), (1, 2), (2, 2), (3, 4), (1000, 1024), (1024, 1024)] {
            let (tx, rx) = mpsc_queue::<u8>(asked);
            assert_eq!(tx.capacity(), expected);
            assert_eq!(rx.capacity(), expected);
        }
    }

    #[test]
    fn full_and_empty() {
        let (tx, mut rx) = mpsc_queue::<usize>(4);
        assert!(rx.poll().is_none());
        for i in 0..4 {
            tx.offer(i).unwrap();
        }
        assert_eq!(tx.len(), 4);
        assert_eq!(tx.offer(4), Err(4));

        assert_eq!(rx.poll(), Some(0));
        tx.offer(4).unwrap();
        for i in 1..=4 {
            assert_eq!(rx.poll(), Some(i));
        }
        assert!(rx.poll().is_none());
        assert!(rx.is_empty());
    }

    // Elements of each producer arrive in order, none lost or duplicated
    #[test]
    fn it_works() {
        const P: usize = 4;
        const N: usize = 250_000;

        let (tx, mut rx) = mpsc_queue::<(usize, usize)>(16);

        let producers: Vec<_> = (0..P)
            .map(|id| {
                let tx = tx.clone();
                std::thread::spawn(move || {
                    let mut current = 0;
                    while current < N {
                        if tx.offer((id, current)).is_ok() {
                            current += 1;
                        } else {
                            std::thread::yield_now();
                        }
                    }
                })
            })
            .collect();
        drop(tx);

        let c = std::thread::spawn(move || {
            let mut next = [0usize; P];
            let mut total = 0;
            while total < P * N {
                if let Some((id, seq)) = rx.poll() {
                    assert_eq!(seq, next[id], "producer {id} out of order");
                    next[id] += 1;
                    total += 1;
                } else {
                    std::thread::yield_now();
                }
            }
            assert!(rx.poll().is_none());
            next
        });

        for p in producers {
            p.join().unwrap();
        }
        let next = c.join().unwrap();
        assert!(next.iter().all(|n| *n == N));
    }

    // Memory drop check
    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    struct DropCounter;

    impl DropCounter {
        fn new() -> Self {
            COUNTER.fetch_add(1, Ordering::SeqCst);
            Self
        }
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            COUNTER.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn memcheck() {
        const N: usize = 128;

        let (tx, mut rx) = mpsc_queue::<DropCounter>(N);
        for _ in 0..N {
            assert!(tx.offer(DropCounter::new()).is_ok());
        }
        // The rejected item is handed back and dropped here
        assert!(tx.offer(DropCounter::new()).is_err());

        assert_eq!(
            COUNTER.load(Ordering::SeqCst),
            N,
            "There should be as many counters as ringbuffer capacity"
        );

        // Move the head away from zero so that draining starts mid-ring
        for _ in 0..N / 2 {
            drop(rx.poll());
        }
        assert_eq!(COUNTER.load(Ordering::SeqCst), N / 2);

        // Drop both consumer and producer
        drop(tx);
        drop(rx);

        assert_eq!(
            COUNTER.load(Ordering::SeqCst),
            0,
            "All the drop counters should have been dropped"
        );
    }
}
