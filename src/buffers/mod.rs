pub(crate) mod bytes;
pub(crate) mod chunk;
pub(crate) mod cursor;
mod slice;
mod vec;

pub(crate) use bytes::*;
pub(crate) use chunk::*;
pub(crate) use cursor::*;
use thiserror::Error;

// SAFETY: the buffers in this crate keep track of their own readable and
// writable regions and check boundaries before slicing. Tests keep the checked
// `[range]` syntax so that any bookkeeping mistake panics loudly; release builds
// skip the redundant check.
#[cfg(test)]
macro_rules! unsafe_slice {
    ($s:expr,$r:expr) => {
        &$s[$r]
    };
}

#[cfg(test)]
macro_rules! unsafe_slice_mut {
    ($s:expr,$r:expr) => {
        &mut $s[$r]
    };
}

#[cfg(not(test))]
macro_rules! unsafe_slice {
    ($s:expr,$r:expr) => {{
        let slice = &*$s;
        let index = $r;
        unsafe { slice.get_unchecked(index) }
    }};
}

#[cfg(not(test))]
macro_rules! unsafe_slice_mut {
    ($s:expr,$r:expr) => {{
        let slice = &mut *$s;
        let index = $r;
        unsafe { slice.get_unchecked_mut(index) }
    }};
}

pub(crate) use unsafe_slice;
pub(crate) use unsafe_slice_mut;

/// Cursor misuse on a [`ByteBuf`].
///
/// Both variants denote a programming or protocol error on the caller's side:
/// they are never retried and the connection owner is expected to close the
/// connection when one surfaces from a decoder.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// An absolute offset fell outside the readable region.
    ///
    /// Every index-taking operation of [`ByteBuf`] (`get_u8`, `index_of`)
    /// only accepts offsets within `[reader_index, writer_index)`.
    #[error("offset {offset} outside readable region [{reader_index}, {writer_index})")]
    OutOfRange {
        offset: usize,
        reader_index: usize,
        writer_index: usize,
    },

    /// A read or slice asked for more bytes than are currently readable.
    #[error("requested {requested} bytes but only {remaining} are readable")]
    InsufficientData { requested: usize, remaining: usize },
}

/// Sinks that header codecs serialize into.
pub(crate) mod writer {
    use core::num::NonZeroUsize;

    #[derive(Debug, Clone, Copy)]
    pub(crate) struct DidntWrite;

    pub(crate) trait Writer {
        /// Copies a prefix of `bytes`, failing only when nothing fits.
        fn write(&mut self, bytes: &[u8]) -> Result<NonZeroUsize, DidntWrite>;

        /// Copies all of `bytes` or nothing.
        fn write_exact(&mut self, bytes: &[u8]) -> Result<(), DidntWrite>;

        /// Free space left in the sink.
        fn remaining(&self) -> usize;

        fn write_u8(&mut self, byte: u8) -> Result<(), DidntWrite> {
            self.write_exact(core::slice::from_ref(&byte))
        }

        /// Lends `len` writable bytes to `write`, which returns how many of
        /// them it filled.
        ///
        /// # Safety
        ///
        /// The value returned by `write` must not exceed `len`.
        unsafe fn with_slot<F>(&mut self, len: usize, write: F) -> Result<NonZeroUsize, DidntWrite>
        where
            F: FnOnce(&mut [u8]) -> usize;
    }

    pub(crate) trait HasWriter {
        type Writer: Writer;

        fn writer(self) -> Self::Writer;
    }
}

/// Sources that header codecs decode from.
pub(crate) mod reader {
    use core::num::NonZeroUsize;

    #[derive(Debug, Clone, Copy)]
    pub(crate) struct DidntRead;

    pub(crate) trait Reader {
        /// Fills a prefix of `into`, failing only when the source is empty.
        fn read(&mut self, into: &mut [u8]) -> Result<NonZeroUsize, DidntRead>;

        /// Fills all of `into` or consumes nothing.
        fn read_exact(&mut self, into: &mut [u8]) -> Result<(), DidntRead>;

        fn remaining(&self) -> usize;

        fn read_u8(&mut self) -> Result<u8, DidntRead> {
            let mut byte = 0;
            let read = self.read(core::slice::from_mut(&mut byte))?;
            if read.get() == 1 { Ok(byte) } else { Err(DidntRead) }
        }

        fn can_read(&self) -> bool {
            self.remaining() != 0
        }
    }

    pub(crate) trait HasReader {
        type Reader: Reader;

        fn reader(self) -> Self::Reader;
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ByteBuf,
        reader::{HasReader, Reader},
        writer::{HasWriter, Writer},
    };

    const BYTES: usize = 18;

    const WBS0: u8 = 0;
    const WBS1: u8 = 1;
    const WBS2: [u8; 4] = [2, 3, 4, 5];
    const WBS3: [u8; 4] = [6, 7, 8, 9];
    const WBS4: [u8; 4] = [10, 11, 12, 13];
    const WBS5: [u8; 4] = [14, 15, 16, 17];

    macro_rules! run_write {
        ($buffer:expr) => {{
            println!(">>> Write");
            let mut writer = $buffer.writer();
            assert_ne!(writer.remaining(), 0);

            writer.write_u8(WBS0).unwrap();
            writer.write_u8(WBS1).unwrap();

            let w = writer.write(&WBS2).unwrap();
            assert_eq!(4, w.get());

            writer.write_exact(&WBS3).unwrap();
            writer.write_exact(&WBS4).unwrap();

            // SAFETY: callback returns the length of the buffer
            unsafe {
                writer.with_slot(4, |mut buffer| {
                    let w = buffer.write(&WBS5).unwrap();
                    assert_eq!(4, w.get());
                    w.get()
                })
            }
            .unwrap();
        }};
    }

    macro_rules! run_read {
        ($buffer:expr) => {
            println!(">>> Read");
            let mut reader = $buffer.reader();

            let b = reader.read_u8().unwrap();
            assert_eq!(WBS0, b);
            assert_eq!(BYTES - 1, reader.remaining());
            let b = reader.read_u8().unwrap();
            assert_eq!(WBS1, b);
            assert_eq!(BYTES - 2, reader.remaining());

            let mut rbs: [u8; 4] = [0, 0, 0, 0];
            let r = reader.read(&mut rbs).unwrap();
            assert_eq!(4, r.get());
            assert_eq!(BYTES - 6, reader.remaining());
            assert_eq!(WBS2, rbs);

            reader.read_exact(&mut rbs).unwrap();
            assert_eq!(BYTES - 10, reader.remaining());
            assert_eq!(WBS3, rbs);

            reader.read_exact(&mut rbs).unwrap();
            assert_eq!(BYTES - 14, reader.remaining());
            assert_eq!(WBS4, rbs);

            reader.read_exact(&mut rbs).unwrap();
            assert_eq!(BYTES - 18, reader.remaining());
            assert_eq!(WBS5, rbs);

            assert!(reader.read(&mut rbs).is_err());
            assert!(reader.read_u8().is_err());
            assert!(reader.read_exact(&mut rbs).is_err());
        };
    }

    macro_rules! run_empty {
        ($buffer:expr) => {
            let mut s = [0u8; 64];

            println!(">>> Read empty");
            let mut reader = $buffer.reader();
            assert!(reader.read_u8().is_err());
            assert!(reader.read(&mut s).is_err());
            assert!(reader.read_exact(&mut s).is_err());
        };
    }

    #[test]
    fn buffer_slice() {
        println!("Buffer Slice");
        let mut sbuf = [0u8; BYTES];
        run_write!(sbuf.as_mut());
        run_read!(sbuf.as_ref());
    }

    #[test]
    fn buffer_vec() {
        println!("Buffer Vec");
        let mut vbuf = vec![];
        run_empty!(&vbuf);
        run_write!(&mut vbuf);
        run_read!(&vbuf);
    }

    #[test]
    fn buffer_bytebuf() {
        println!("Buffer ByteBuf");
        let mut buf = ByteBuf::with_capacity(8);
        run_write!(&mut buf);
        assert_eq!(buf.remaining(), BYTES);
        assert_eq!(buf.writer_index(), BYTES);
        run_read!(buf.as_slice());

        // Writes after a slice leave the slice alone
        let head = buf.slice(2).unwrap();
        run_write!(&mut buf);
        assert_eq!(head, [WBS0, WBS1]);
        assert_eq!(buf.remaining(), 2 * BYTES - 2);
    }
}
