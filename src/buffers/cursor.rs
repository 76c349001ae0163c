use core::{fmt, num::NonZeroUsize};
use std::sync::Arc;

use super::{
    BufferError, Chunk, DynBuf,
    writer::{DidntWrite, HasWriter, Writer},
};
use crate::{
    codec::{FrameCodec, WCodec},
    protocol::Priority,
};

/// A growable byte buffer with independent read and write cursors.
///
/// Valid bytes live in `[0, writer_index)`, and `[reader_index, writer_index)`
/// is the readable region:
///
/// ```text
///  0        reader_index      writer_index          capacity
///  |  consumed  |   readable     |     writable        |
/// ```
///
/// The storage is reference counted. [`slice`](ByteBuf::slice) hands out a
/// zero-copy [`Chunk`] over the next `n` readable bytes and advances the
/// reader; a later write into a buffer whose storage is still shared with
/// such chunks first moves the unread bytes into fresh storage, so handed out
/// chunks are never mutated.
///
/// Every buffer carries a [`Priority`] tag, set by the producer and used by
/// the scheduler to pick a class.
///
/// ```
/// use framelane::{ByteBuf, Priority};
///
/// let mut buf = ByteBuf::with_capacity(16).with_priority(Priority::new(2));
/// buf.write_short(0xCAFE);
/// buf.write_slice(b"hello");
///
/// assert_eq!(buf.read_short().unwrap(), 0xCAFE);
/// let hello = buf.slice(5).unwrap();
/// assert_eq!(hello, b"hello");
/// assert!(!buf.is_readable());
/// ```
pub struct ByteBuf {
    storage: Arc<Vec<u8>>,
    reader_index: usize,
    priority: Priority,
}

impl ByteBuf {
    /// Creates an empty buffer without allocating.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty buffer able to hold `capacity` bytes before growing.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: Arc::new(Vec::with_capacity(capacity)),
            reader_index: 0,
            priority: Priority::DEFAULT,
        }
    }

    /// Sets the priority tag.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    /// Total number of bytes the storage can hold before reallocating.
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    pub fn reader_index(&self) -> usize {
        self.reader_index
    }

    pub fn writer_index(&self) -> usize {
        self.storage.len()
    }

    /// Number of readable bytes, `writer_index - reader_index`.
    pub fn remaining(&self) -> usize {
        self.writer_index() - self.reader_index
    }

    pub fn is_readable(&self) -> bool {
        self.remaining() != 0
    }

    /// The readable bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: reader_index <= writer_index is kept by every operation.
        super::unsafe_slice!(self.storage.as_slice(), self.reader_index..)
    }

    // Storage handed out mutably. When the storage is shared with chunks,
    // the unread bytes move to a fresh allocation first.
    pub(crate) fn storage_mut(&mut self) -> &mut Vec<u8> {
        if Arc::get_mut(&mut self.storage).is_none() {
            self.relocate();
        }
        // The storage is unique at this point: make_mut never clones.
        Arc::make_mut(&mut self.storage)
    }

    fn relocate(&mut self) {
        let mut fresh = Vec::with_capacity(self.capacity() - self.reader_index);
        fresh.extend_from_slice(self.as_slice());
        self.storage = Arc::new(fresh);
        self.reader_index = 0;
    }

    fn check_offset(&self, offset: usize) -> Result<(), BufferError> {
        if offset < self.reader_index || offset >= self.writer_index() {
            return Err(BufferError::OutOfRange {
                offset,
                reader_index: self.reader_index,
                writer_index: self.writer_index(),
            });
        }
        Ok(())
    }

    fn check_remaining(&self, requested: usize) -> Result<(), BufferError> {
        if self.remaining() < requested {
            return Err(BufferError::InsufficientData {
                requested,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    // -- write

    pub fn write_u8(&mut self, byte: u8) {
        self.storage_mut().push(byte);
    }

    pub fn write_slice(&mut self, bytes: &[u8]) {
        self.storage_mut().extend_from_slice(bytes);
    }

    /// Writes a big-endian `u16`.
    pub fn write_short(&mut self, value: u16) {
        self.write_slice(&value.to_be_bytes());
    }

    /// Writes a big-endian `u32`.
    pub fn write_int(&mut self, value: u32) {
        self.write_slice(&value.to_be_bytes());
    }

    /// Writes `value` as a variable-length integer (7 bits per byte, least
    /// significant group first) and returns the number of bytes written.
    pub fn write_var_len(&mut self, value: u32) -> usize {
        let before = self.writer_index();
        let res = FrameCodec::new().write(&mut self.writer(), value);
        debug_assert!(res.is_ok(), "growable storage refused a write");
        self.writer_index() - before
    }

    // -- read

    /// Reads one byte and advances the reader.
    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        self.check_remaining(1)?;
        let byte = self.storage[self.reader_index];
        self.reader_index += 1;
        Ok(byte)
    }

    /// Reads a big-endian `u16` and advances the reader.
    pub fn read_short(&mut self) -> Result<u16, BufferError> {
        let mut be = [0u8; 2];
        self.read_into(&mut be)?;
        Ok(u16::from_be_bytes(be))
    }

    /// Reads a big-endian `u32` and advances the reader.
    pub fn read_int(&mut self) -> Result<u32, BufferError> {
        let mut be = [0u8; 4];
        self.read_into(&mut be)?;
        Ok(u32::from_be_bytes(be))
    }

    fn read_into(&mut self, into: &mut [u8]) -> Result<(), BufferError> {
        self.check_remaining(into.len())?;
        into.copy_from_slice(&self.as_slice()[..into.len()]);
        self.reader_index += into.len();
        Ok(())
    }

    /// Returns the byte at absolute `offset` without moving the reader.
    ///
    /// # Errors
    ///
    /// [`BufferError::OutOfRange`] when `offset` is outside
    /// `[reader_index, writer_index)`.
    pub fn get_u8(&self, offset: usize) -> Result<u8, BufferError> {
        self.check_offset(offset)?;
        Ok(self.storage[offset])
    }

    /// Advances the reader by `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), BufferError> {
        self.check_remaining(n)?;
        self.reader_index += n;
        Ok(())
    }

    /// Returns a zero-copy view over the next `n` readable bytes and advances
    /// the reader past them.
    ///
    /// # Errors
    ///
    /// [`BufferError::InsufficientData`] if fewer than `n` bytes are readable.
    pub fn slice(&mut self, n: usize) -> Result<Chunk, BufferError> {
        self.check_remaining(n)?;
        Ok(self.take_chunk(n))
    }

    // Zero-copy view over at most `n` readable bytes.
    pub(crate) fn take_chunk(&mut self, n: usize) -> Chunk {
        let n = n.min(self.remaining());
        let start = self.reader_index;
        self.reader_index += n;
        let storage: Arc<dyn DynBuf> = self.storage.clone();
        // SAFETY: `n <= remaining`, so `start + n <= writer_index` which is
        // the length of the storage.
        unsafe { Chunk::new_unchecked(storage, start, start + n) }
    }

    // Advances the reader by at most `n` bytes.
    pub(crate) fn advance(&mut self, n: usize) {
        self.reader_index += n.min(self.remaining());
    }

    /// Moves up to `limit` bytes (all readable bytes when `None`) from
    /// `other` into `self`, advancing both cursors. Returns the number of
    /// bytes moved.
    pub fn drain_from(&mut self, other: &mut ByteBuf, limit: Option<usize>) -> usize {
        let n = limit.map_or(other.remaining(), |l| l.min(other.remaining()));
        if n == 0 {
            return 0;
        }
        self.write_slice(&other.as_slice()[..n]);
        other.reader_index += n;
        n
    }

    /// Returns the absolute offset of the first occurrence of `pattern`
    /// starting at or after `from`, or `None` if the readable region does not
    /// contain it.
    ///
    /// # Errors
    ///
    /// [`BufferError::OutOfRange`] when `from` is outside
    /// `[reader_index, writer_index)`.
    pub fn index_of(&self, pattern: &[u8], from: usize) -> Result<Option<usize>, BufferError> {
        self.check_offset(from)?;
        if pattern.is_empty() {
            return Ok(Some(from));
        }
        let haystack = &self.storage[from..];
        Ok(haystack
            .windows(pattern.len())
            .position(|w| w == pattern)
            .map(|p| from + p))
    }

    // -- lifecycle

    /// Resets both cursors to zero, forgetting all content.
    pub fn clear(&mut self) {
        match Arc::get_mut(&mut self.storage) {
            Some(v) => v.clear(),
            None => self.storage = Arc::new(Vec::with_capacity(self.storage.capacity())),
        }
        self.reader_index = 0;
    }

    /// Moves the readable bytes to the front of the storage so that
    /// `reader_index` becomes zero.
    pub fn compact(&mut self) {
        if self.reader_index == 0 {
            return;
        }
        match Arc::get_mut(&mut self.storage) {
            Some(v) => {
                v.drain(..self.reader_index);
                self.reader_index = 0;
            }
            None => self.relocate(),
        }
    }

    /// Compacts and releases unused capacity.
    pub fn shrink_to_fit(&mut self) {
        self.compact();
        self.storage_mut().shrink_to_fit();
    }

    /// Turns the readable bytes into a [`Chunk`] without copying.
    pub fn freeze(mut self) -> Chunk {
        let n = self.remaining();
        self.take_chunk(n)
    }

    /// Releases the buffer. The storage itself is freed once the last
    /// [`Chunk`] sliced from it is dropped.
    pub fn dispose(self) {}
}

impl Default for ByteBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuf")
            .field("reader_index", &self.reader_index)
            .field("writer_index", &self.writer_index())
            .field("capacity", &self.capacity())
            .field("priority", &self.priority)
            .finish()
    }
}

impl From<Vec<u8>> for ByteBuf {
    fn from(v: Vec<u8>) -> Self {
        Self {
            storage: Arc::new(v),
            reader_index: 0,
            priority: Priority::DEFAULT,
        }
    }
}

impl From<&[u8]> for ByteBuf {
    fn from(s: &[u8]) -> Self {
        Self::from(s.to_vec())
    }
}

impl From<Chunk> for ByteBuf {
    fn from(c: Chunk) -> Self {
        Self::from(c.as_slice())
    }
}

// Writer
pub(crate) struct ByteBufWriter<'a>(&'a mut ByteBuf);

impl<'a> HasWriter for &'a mut ByteBuf {
    type Writer = ByteBufWriter<'a>;

    fn writer(self) -> Self::Writer {
        ByteBufWriter(self)
    }
}

impl Writer for ByteBufWriter<'_> {
    fn write(&mut self, bytes: &[u8]) -> Result<NonZeroUsize, DidntWrite> {
        self.0.storage_mut().writer().write(bytes)
    }

    fn write_exact(&mut self, bytes: &[u8]) -> Result<(), DidntWrite> {
        self.0.write_slice(bytes);
        Ok(())
    }

    fn remaining(&self) -> usize {
        usize::MAX
    }

    unsafe fn with_slot<F>(&mut self, len: usize, write: F) -> Result<NonZeroUsize, DidntWrite>
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        // SAFETY: same precondition as the enclosing function
        unsafe { self.0.storage_mut().writer().with_slot(len, write) }
    }
}
