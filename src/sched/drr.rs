use std::collections::{HashMap, VecDeque};

use crate::{buffers::ByteBuf, codec::Frame, protocol::Priority};

/// Something the scheduler can queue: it has a priority and a size.
pub trait Schedulable {
    fn priority(&self) -> Priority;

    /// Number of bytes charged against the class deficit.
    fn byte_len(&self) -> usize;
}

impl Schedulable for ByteBuf {
    fn priority(&self) -> Priority {
        ByteBuf::priority(self)
    }

    fn byte_len(&self) -> usize {
        self.remaining()
    }
}

impl Schedulable for Frame {
    fn priority(&self) -> Priority {
        Frame::priority(self)
    }

    fn byte_len(&self) -> usize {
        self.len()
    }
}

/// Default number of bytes a class of weight 1 may send per round.
pub const DEFAULT_BASE_QUANTUM: usize = 4096;

/// Deficit round robin parameters.
///
/// Each class is bound to one [`Priority`] and receives
/// `max(1, round(base_quantum * weight))` bytes of credit per round. Classes
/// are visited in the order they were added. Items whose priority has no
/// class go to the default class: the first class unless
/// [`with_default_class`](DrrConfig::with_default_class) says otherwise.
///
/// ```
/// use framelane::{DrrConfig, Priority};
///
/// // Control traffic gets twice the bandwidth of bulk traffic
/// let config = DrrConfig::default()
///     .with_base_quantum(1500)
///     .with_class(Priority::new(0), 2.0)
///     .with_class(Priority::new(1), 1.0);
/// assert_eq!(config.quantum(Priority::new(0)), Some(3000));
/// assert_eq!(config.quantum(Priority::new(1)), Some(1500));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DrrConfig {
    base_quantum: usize,
    classes: Vec<(Priority, f64)>,
    default_class: Option<Priority>,
}

impl Default for DrrConfig {
    /// No explicit class: everything shares a single class of weight 1.
    fn default() -> Self {
        Self {
            base_quantum: DEFAULT_BASE_QUANTUM,
            classes: Vec::new(),
            default_class: None,
        }
    }
}

impl DrrConfig {
    #[must_use]
    pub fn with_base_quantum(mut self, base_quantum: usize) -> Self {
        self.base_quantum = base_quantum;
        self
    }

    /// Adds a class. A priority added twice keeps its first weight.
    #[must_use]
    pub fn with_class(mut self, priority: Priority, weight: f64) -> Self {
        if !self.classes.iter().any(|(p, _)| *p == priority) {
            self.classes.push((priority, weight));
        }
        self
    }

    /// Class receiving the items of unknown priority. Ignored if no class is
    /// bound to `priority`.
    #[must_use]
    pub fn with_default_class(mut self, priority: Priority) -> Self {
        self.default_class = Some(priority);
        self
    }

    pub fn base_quantum(&self) -> usize {
        self.base_quantum
    }

    pub fn classes(&self) -> &[(Priority, f64)] {
        &self.classes
    }

    /// Per-round credit of the class bound to `priority`.
    pub fn quantum(&self, priority: Priority) -> Option<i64> {
        self.classes
            .iter()
            .find(|(p, _)| *p == priority)
            .map(|(_, w)| quantum(self.base_quantum, *w))
    }
}

fn quantum(base: usize, weight: f64) -> i64 {
    // NaN and negative weights end up at the floor
    ((base as f64 * weight).round() as i64).max(1)
}

fn charge(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

#[derive(Debug)]
struct Class<T> {
    priority: Priority,
    quantum: i64,
    deficit: i64,
    queue: VecDeque<T>,
}

/// Deficit round robin over priority classes.
///
/// Per round, every class holding items has its quantum added to its deficit
/// and then sends head items while the head fits in the deficit. A head that
/// does not fit stays for the next round together with the unspent deficit.
/// A class found empty loses its deficit, so credit cannot be hoarded while
/// idle. Every class holding items is served within
/// `ceil(head_len / quantum)` rounds, whatever the other classes do.
///
/// [`pull`](DrrScheduler::pull) hands out one item at a time and resumes
/// exactly where the previous call stopped, so pulling one by one yields the
/// same order as [`round`](DrrScheduler::round).
///
/// ```
/// use framelane::{ByteBuf, DrrConfig, DrrScheduler, Priority};
///
/// let (a, b) = (Priority::new(0), Priority::new(1));
/// let config = DrrConfig::default()
///     .with_base_quantum(10)
///     .with_class(a, 2.0)
///     .with_class(b, 1.0);
/// let mut drr = DrrScheduler::new(config);
///
/// for _ in 0..4 {
///     drr.push(ByteBuf::from(vec![0u8; 10]).with_priority(a));
///     drr.push(ByteBuf::from(vec![0u8; 10]).with_priority(b));
/// }
///
/// let mut order = vec![];
/// drr.round(|buf| order.push(buf.priority()));
/// assert_eq!(order, [a, a, b]);
/// ```
#[derive(Debug)]
pub struct DrrScheduler<T> {
    classes: Vec<Class<T>>,
    index: HashMap<Priority, usize>,
    default: usize,
    // Class being served and whether it already got its quantum this visit
    cursor: usize,
    credited: bool,
    len: usize,
}

impl<T: Schedulable> DrrScheduler<T> {
    pub fn new(config: DrrConfig) -> Self {
        let DrrConfig {
            base_quantum,
            mut classes,
            default_class,
        } = config;
        if classes.is_empty() {
            classes.push((Priority::DEFAULT, 1.0));
        }

        let classes: Vec<Class<T>> = classes
            .into_iter()
            .map(|(priority, weight)| Class {
                priority,
                quantum: quantum(base_quantum, weight),
                deficit: 0,
                queue: VecDeque::new(),
            })
            .collect();
        let index: HashMap<Priority, usize> = classes.iter().enumerate().map(|(i, c)| (c.priority, i)).collect();
        let default = default_class.and_then(|p| index.get(&p).copied()).unwrap_or(0);

        Self {
            classes,
            index,
            default,
            cursor: 0,
            credited: false,
            len: 0,
        }
    }

    /// Queues `item` in the class bound to its priority.
    pub fn push(&mut self, item: T) {
        let i = self.index.get(&item.priority()).copied().unwrap_or(self.default);
        self.classes[i].queue.push_back(item);
        self.len += 1;
    }

    /// Returns the next item in DRR order.
    pub fn pull(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        loop {
            if let (Some(item), _) = self.step() {
                return Some(item);
            }
        }
    }

    /// Serves the remainder of the current round, up to and including the
    /// last class, and returns how many items were emitted.
    pub fn round<F: FnMut(T)>(&mut self, mut emit: F) -> usize {
        let last = self.classes.len() - 1;
        let mut emitted = 0;
        loop {
            let at_last = self.cursor == last;
            let (item, moved) = self.step();
            if let Some(item) = item {
                emit(item);
                emitted += 1;
            }
            if moved && at_last {
                return emitted;
            }
        }
    }

    // One action on the current class: hand out its head or move on to the
    // next class. Returns the item, if any, and whether the cursor moved.
    fn step(&mut self) -> (Option<T>, bool) {
        let class = &mut self.classes[self.cursor];
        if !self.credited {
            if class.queue.is_empty() {
                class.deficit = 0;
                self.advance();
                return (None, true);
            }
            class.deficit = class.deficit.saturating_add(class.quantum);
            self.credited = true;
        }

        match class.queue.front().map(|head| charge(head.byte_len())) {
            Some(len) if len <= class.deficit => {
                let item = class.queue.pop_front();
                class.deficit -= len;
                self.len -= 1;
                if class.queue.is_empty() {
                    class.deficit = 0;
                    self.advance();
                    return (item, true);
                }
                (item, false)
            }
            Some(_) => {
                self.advance();
                (None, true)
            }
            None => {
                class.deficit = 0;
                self.advance();
                (None, true)
            }
        }
    }

    fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.classes.len();
        self.credited = false;
    }
}

impl<T> DrrScheduler<T> {
    /// Number of queued items across all classes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of items queued in the class bound to `priority`.
    pub fn class_len(&self, priority: Priority) -> Option<usize> {
        self.index.get(&priority).map(|i| self.classes[*i].queue.len())
    }

    /// Current deficit of the class bound to `priority`.
    pub fn deficit(&self, priority: Priority) -> Option<i64> {
        self.index.get(&priority).map(|i| self.classes[*i].deficit)
    }

    /// Drops every queued item and resets all deficits.
    pub fn clear(&mut self) {
        for class in self.classes.iter_mut() {
            class.queue.clear();
            class.deficit = 0;
        }
        self.cursor = 0;
        self.credited = false;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Item {
        priority: Priority,
        len: usize,
        seq: usize,
    }

    impl Schedulable for Item {
        fn priority(&self) -> Priority {
            self.priority
        }

        fn byte_len(&self) -> usize {
            self.len
        }
    }

    fn item(p: i32, len: usize, seq: usize) -> Item {
        Item {
            priority: Priority::new(p),
            len,
            seq,
        }
    }

    fn two_classes(base: usize, wa: f64, wb: f64) -> DrrScheduler<Item> {
        DrrScheduler::new(
            DrrConfig::default()
                .with_base_quantum(base)
                .with_class(Priority::new(0), wa)
                .with_class(Priority::new(1), wb),
        )
    }

    #[test]
    fn drr_fairness_2_to_1() {
        let mut drr = two_classes(100, 2.0, 1.0);
        for i in 0..1000 {
            drr.push(item(0, 100, i));
            drr.push(item(1, 100, i));
        }

        let mut counts = [0usize; 2];
        for _ in 0..300 {
            let it = drr.pull().unwrap();
            counts[it.priority.get() as usize] += 1;
        }
        println!("counts: {counts:?}");
        assert_eq!(counts, [200, 100]);
    }

    #[test]
    fn drr_fairness_half_weight() {
        let config = DrrConfig::default()
            .with_base_quantum(DEFAULT_BASE_QUANTUM)
            .with_class(Priority::new(0), 1.0)
            .with_class(Priority::new(1), 0.5);
        assert_eq!(config.quantum(Priority::new(0)), Some(4096));
        assert_eq!(config.quantum(Priority::new(1)), Some(2048));

        let mut drr = DrrScheduler::new(config);
        for i in 0..1000 {
            drr.push(item(0, 512, i));
            drr.push(item(1, 512, i));
        }

        // 8 + 4 items of 512 bytes per round
        let mut bytes = [0usize; 2];
        for _ in 0..12 * 40 {
            let it = drr.pull().unwrap();
            bytes[it.priority.get() as usize] += it.len;
        }
        println!("bytes: {bytes:?}");
        assert_eq!(bytes, [40 * 4096, 40 * 2048]);
    }

    #[test]
    fn drr_no_starvation() {
        let mut drr = two_classes(100, 1.0, 1.0);
        for i in 0..10_000 {
            drr.push(item(0, 10, i));
        }
        drr.push(item(1, 1000, 0));

        let mut rounds = 0;
        let mut served = false;
        while !served {
            rounds += 1;
            drr.round(|it| served |= it.priority == Priority::new(1));
            assert!(drr.deficit(Priority::new(1)).unwrap() >= 0);
        }
        // ceil(1000 / 100)
        assert!(rounds <= 10, "served after {rounds} rounds");
    }

    #[test]
    fn drr_fifo_per_class() {
        let mut rng = rand::rng();
        let mut drr = DrrScheduler::new(
            DrrConfig::default()
                .with_base_quantum(64)
                .with_class(Priority::new(0), 1.0)
                .with_class(Priority::new(1), 0.5)
                .with_class(Priority::new(2), 3.0),
        );

        let mut next_in = [0usize; 3];
        for _ in 0..5_000 {
            let p = Priority::rand(3);
            let class = p.get() as usize;
            drr.push(item(p.get(), rng.random_range(0..200), next_in[class]));
            next_in[class] += 1;
        }
        assert_eq!(drr.len(), 5_000);

        let mut next_out = [0usize; 3];
        while let Some(it) = drr.pull() {
            let class = it.priority.get() as usize;
            assert_eq!(it.seq, next_out[class]);
            next_out[class] += 1;
            for p in 0..3 {
                assert!(drr.deficit(Priority::new(p)).unwrap() >= 0);
            }
        }
        assert_eq!(next_in, next_out);
        assert!(drr.is_empty());
    }

    #[test]
    fn drr_pull_matches_round() {
        let mut rng = rand::rng();
        let items: Vec<Item> = (0..2_000)
            .map(|i| item(rng.random_range(0..3), rng.random_range(1..300), i))
            .collect();

        let config = DrrConfig::default()
            .with_base_quantum(128)
            .with_class(Priority::new(0), 1.0)
            .with_class(Priority::new(1), 2.0)
            .with_class(Priority::new(2), 0.25);

        let mut by_pull = DrrScheduler::new(config.clone());
        let mut by_round = DrrScheduler::new(config);
        for it in items {
            by_pull.push(it.clone());
            by_round.push(it);
        }

        let pulled: Vec<Item> = std::iter::from_fn(|| by_pull.pull()).collect();
        let mut rounded = vec![];
        while !by_round.is_empty() {
            by_round.round(|it| rounded.push(it));
        }
        assert_eq!(pulled, rounded);
    }

    #[test]
    fn drr_empty_class_resets_deficit() {
        let mut drr = two_classes(100, 1.0, 1.0);
        drr.push(item(0, 150, 0));
        drr.push(item(1, 10, 0));

        // Round 1: class 0 cannot send (100 < 150), class 1 sends and empties
        assert_eq!(drr.round(|_| {}), 1);
        assert_eq!(drr.deficit(Priority::new(0)), Some(100));
        assert_eq!(drr.deficit(Priority::new(1)), Some(0));

        // Round 2: class 0 sends with 200 and empties
        assert_eq!(drr.round(|_| {}), 1);
        assert_eq!(drr.deficit(Priority::new(0)), Some(0));
        assert!(drr.is_empty());
        assert_eq!(drr.round(|_| {}), 0);
    }

    #[test]
    fn drr_default_class() {
        let mut drr = DrrScheduler::new(
            DrrConfig::default()
                .with_class(Priority::new(0), 1.0)
                .with_class(Priority::new(1), 1.0)
                .with_default_class(Priority::new(1)),
        );
        drr.push(item(42, 1, 0));
        assert_eq!(drr.class_len(Priority::new(1)), Some(1));
        assert_eq!(drr.class_len(Priority::new(0)), Some(0));
        assert_eq!(drr.class_len(Priority::new(42)), None);

        // Without explicit classes everything shares one class
        let mut drr = DrrScheduler::new(DrrConfig::default());
        drr.push(item(-7, 1, 0));
        drr.push(item(7, 1, 1));
        assert_eq!(drr.class_len(Priority::DEFAULT), Some(2));
        assert_eq!(drr.pull().map(|i| i.seq), Some(0));
        assert_eq!(drr.pull().map(|i| i.seq), Some(1));
    }

    #[test]
    fn drr_quantum_floor() {
        let config = DrrConfig::default()
            .with_base_quantum(10)
            .with_class(Priority::new(0), 0.0)
            .with_class(Priority::new(1), f64::NAN)
            .with_class(Priority::new(2), 0.26);
        assert_eq!(config.quantum(Priority::new(0)), Some(1));
        assert_eq!(config.quantum(Priority::new(1)), Some(1));
        assert_eq!(config.quantum(Priority::new(2)), Some(3));
        assert_eq!(config.quantum(Priority::new(3)), None);

        // A zero-weight class still makes progress
        let mut drr = DrrScheduler::new(config);
        drr.push(item(0, 5, 0));
        assert_eq!(drr.pull().map(|i| i.seq), Some(0));
    }

    #[test]
    fn drr_clear() {
        let mut drr = two_classes(10, 1.0, 1.0);
        drr.push(item(0, 100, 0));
        drr.round(|_| {});
        assert!(drr.deficit(Priority::new(0)).unwrap() > 0);

        drr.clear();
        assert!(drr.is_empty());
        assert_eq!(drr.deficit(Priority::new(0)), Some(0));
        assert!(drr.pull().is_none());
    }

    #[test]
    fn drr_schedules_buffers() {
        let mut drr = DrrScheduler::new(
            DrrConfig::default()
                .with_base_quantum(4)
                .with_class(Priority::new(0), 1.0)
                .with_class(Priority::new(1), 1.0),
        );
        drr.push(ByteBuf::from(vec![0u8; 4]).with_priority(Priority::new(1)));
        drr.push(ByteBuf::from(vec![1u8; 8]).with_priority(Priority::new(0)));

        // Class 0 needs two rounds of credit for its 8 bytes
        let first = drr.pull().unwrap();
        assert_eq!(first.priority(), Priority::new(1));
        let second = drr.pull().unwrap();
        assert_eq!(second.as_slice(), &[1u8; 8]);
    }
}
