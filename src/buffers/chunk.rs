use core::{
    fmt,
    hash::{Hash, Hasher},
    ops::{Bound, Deref, RangeBounds},
};
use std::{any::Any, sync::Arc};

/************************************ */
/* DYN BUFFER */
/************************************ */
/// Backing storage of a [`Chunk`].
///
/// Anything that can hand out a stable byte slice and is `Send + Sync` can be
/// shared behind a [`Chunk`]. [`ByteBuf`](crate::ByteBuf) storage, vectors,
/// boxed slices, arrays and strings are supported out of the box.
pub trait DynBuf: Send + Sync {
    /// Returns a byte slice view of the entire buffer.
    fn as_slice(&self) -> &[u8];

    /// Returns the concrete type as [`std::any::Any`] for downcasting.
    ///
    /// Implementors should always return `self` directly.
    fn as_any(&self) -> &dyn Any;
}

impl DynBuf for Vec<u8> {
    fn as_slice(&self) -> &[u8] {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DynBuf for Box<[u8]> {
    fn as_slice(&self) -> &[u8] {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<const N: usize> DynBuf for [u8; N] {
    fn as_slice(&self) -> &[u8] {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DynBuf for &'static [u8] {
    fn as_slice(&self) -> &[u8] {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DynBuf for String {
    fn as_slice(&self) -> &[u8] {
        self.as_bytes()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/************************************ */
/* CHUNK */
/************************************ */
/// An immutable, reference-counted view over a contiguous byte region.
///
/// Cloning a [`Chunk`] only bumps a reference count; [`view`](Chunk::view)
/// narrows the visible range without copying. The storage is released when
/// the last view referencing it is dropped, so a chunk obtained with
/// [`ByteBuf::slice`](crate::ByteBuf::slice) stays valid no matter what
/// happens to the buffer it was taken from.
///
/// ```
/// use framelane::Chunk;
///
/// let chunk: Chunk = vec![0, 1, 2, 3, 4, 5, 6, 7].into();
///
/// let view = chunk.view(2..5).unwrap();
/// assert_eq!(view.as_slice(), &[2, 3, 4]);
///
/// // Views can be chained and are relative to their parent
/// let sub_view = view.view(1..).unwrap();
/// assert_eq!(sub_view.as_slice(), &[3, 4]);
///
/// assert!(chunk.view(..9).is_none());
/// ```
#[derive(Clone)]
pub struct Chunk {
    buf: Arc<dyn DynBuf>,
    start: usize,
    end: usize,
}

impl Chunk {
    /// Creates a new [`Chunk`] over `buf[start..end]`.
    ///
    /// # Errors
    ///
    /// Returns the original buffer if `start > end` or `end > buf.as_slice().len()`.
    pub fn new(buf: Arc<dyn DynBuf>, start: usize, end: usize) -> Result<Chunk, Arc<dyn DynBuf>> {
        if start <= end && end <= buf.as_slice().len() {
            Ok(Self { buf, start, end })
        } else {
            Err(buf)
        }
    }

    /// Creates a new [`Chunk`] without validating the bounds.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `start <= end` and `end <= buf.as_slice().len()`.
    #[must_use]
    pub(crate) unsafe fn new_unchecked(buf: Arc<dyn DynBuf>, start: usize, end: usize) -> Chunk {
        Self { buf, start, end }
    }

    /// Returns an empty chunk.
    #[must_use]
    pub fn empty() -> Chunk {
        Chunk::from([0u8; 0])
    }

    /// Returns the length of the chunk in bytes.
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns `true` if the chunk has a length of 0.
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a byte slice view of the chunk.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `start <= end <= buf.len()` holds for every constructor:
        // `new()` checks it, `view()` narrows a valid range and
        // `new_unchecked()` moves the obligation to the caller.
        unsafe { self.buf.as_slice().get_unchecked(self.start..self.end) }
    }

    /// Returns `true` when both chunks are views over the same storage.
    pub fn shares_storage(&self, other: &Chunk) -> bool {
        Arc::ptr_eq(&self.buf, &other.buf)
    }

    /// Attempts to downcast the underlying storage to a concrete type reference.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.buf.as_any().downcast_ref()
    }

    /// Creates a view into a subrange of this chunk.
    ///
    /// The range is relative to the current view. Returns `None` if the range
    /// is out of bounds.
    #[must_use]
    pub fn view(&self, range: impl RangeBounds<usize>) -> Option<Self> {
        let start_delta = match range.start_bound() {
            Bound::Included(&n) => n,
            Bound::Excluded(&n) => n + 1,
            Bound::Unbounded => 0,
        };
        let end_delta = match range.end_bound() {
            Bound::Included(&n) => n + 1,
            Bound::Excluded(&n) => n,
            Bound::Unbounded => self.len(),
        };
        (start_delta <= end_delta && end_delta <= self.len()).then_some(Chunk {
            buf: Arc::clone(&self.buf),
            start: self.start + start_delta,
            end: self.start + end_delta,
        })
    }
}

impl Deref for Chunk {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl<Rhs: AsRef<[u8]> + ?Sized> PartialEq<Rhs> for Chunk {
    fn eq(&self, other: &Rhs) -> bool {
        self.as_slice() == other.as_ref()
    }
}

impl Eq for Chunk {}

impl Hash for Chunk {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02x?}", self.as_slice())
    }
}

impl<T> From<Arc<T>> for Chunk
where
    T: DynBuf + 'static,
{
    fn from(buf: Arc<T>) -> Self {
        let end = buf.as_slice().len();
        Self { buf, start: 0, end }
    }
}

impl<T> From<T> for Chunk
where
    T: DynBuf + 'static,
{
    fn from(buf: T) -> Self {
        Self::from(Arc::new(buf))
    }
}

impl Chunk {
    #[cfg(test)]
    pub(crate) fn rand(len: usize) -> Self {
        use rand::Rng;
        let mut rng = rand::rng();
        (0..len).map(|_| rng.random()).collect::<Vec<u8>>().into()
    }
}
