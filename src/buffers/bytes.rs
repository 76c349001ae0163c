use super::Chunk;

/// An ordered sequence of [`Chunk`]s forming one logical byte string.
///
/// Encoded frames are represented as [`Bytes`]: the header lives in its own
/// small chunk and the payload chunk is the zero-copy view taken from the
/// producer's buffer, so the payload is never copied on the way to the socket.
///
/// ```
/// use framelane::Bytes;
///
/// let mut bytes = Bytes::new();
/// bytes.push(b"Hello ".to_vec().into());
/// bytes.push(b"World!".to_vec().into());
///
/// assert_eq!(bytes.len(), 12);
/// assert_eq!(bytes.chunks().count(), 2);
/// assert_eq!(bytes.to_vec(), b"Hello World!");
/// ```
#[derive(Debug, Clone, Default, Eq)]
pub struct Bytes {
    chunks: Vec<Chunk>,
}

impl Bytes {
    /// Creates a new empty [`Bytes`].
    #[must_use]
    pub const fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Creates a new [`Bytes`] holding a single chunk.
    #[must_use]
    pub fn single(chunk: Chunk) -> Self {
        let mut bytes = Self::new();
        bytes.push(chunk);
        bytes
    }

    /// Returns the total number of bytes across all chunks.
    pub fn len(&self) -> usize {
        self.chunks.iter().fold(0, |len, c| len + c.len())
    }

    /// Returns `true` if there is no data.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Removes all chunks.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    /// Appends a chunk. Empty chunks are ignored.
    pub fn push(&mut self, chunk: Chunk) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    /// Returns an iterator over the chunks.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> + '_ {
        self.chunks.iter()
    }

    /// Returns an iterator over the byte slices of all chunks.
    pub fn slices(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.chunks().map(Chunk::as_slice)
    }

    /// Converts into a single contiguous [`Chunk`], copying only when there
    /// is more than one chunk.
    pub fn to_chunk(&self) -> Chunk {
        match self.chunks.as_slice() {
            [] => Chunk::empty(),
            [chunk] => chunk.clone(),
            _ => self.to_vec().into(),
        }
    }

    /// Copies all bytes into a contiguous [`Vec<u8>`].
    pub fn to_vec(&self) -> Vec<u8> {
        self.slices().fold(Vec::with_capacity(self.len()), |mut acc, s| {
            acc.extend_from_slice(s);
            acc
        })
    }
}

impl PartialEq for Bytes {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.slices().flatten().eq(other.slices().flatten())
    }
}

impl<T> From<T> for Bytes
where
    T: Into<Chunk>,
{
    fn from(t: T) -> Self {
        Bytes::single(t.into())
    }
}

impl Extend<Chunk> for Bytes {
    fn extend<I: IntoIterator<Item = Chunk>>(&mut self, iter: I) {
        for chunk in iter {
            self.push(chunk);
        }
    }
}

impl IntoIterator for Bytes {
    type Item = Chunk;
    type IntoIter = std::vec::IntoIter<Chunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.into_iter()
    }
}
