use core::{mem, num::NonZeroUsize};

use super::{
    reader::{DidntRead, HasReader, Reader},
    writer::{DidntWrite, HasWriter, Writer},
};

// Fixed-size slices are written front to back: the slice shrinks as it fills.
impl HasWriter for &mut [u8] {
    type Writer = Self;

    fn writer(self) -> Self::Writer {
        self
    }
}

impl Writer for &mut [u8] {
    fn write(&mut self, bytes: &[u8]) -> Result<NonZeroUsize, DidntWrite> {
        let len = NonZeroUsize::new(bytes.len().min(self.len())).ok_or(DidntWrite)?;
        let (head, tail) = mem::take(self).split_at_mut(len.get());
        head.copy_from_slice(&bytes[..len.get()]);
        *self = tail;
        Ok(len)
    }

    fn write_exact(&mut self, bytes: &[u8]) -> Result<(), DidntWrite> {
        if self.len() < bytes.len() {
            return Err(DidntWrite);
        }
        let (head, tail) = mem::take(self).split_at_mut(bytes.len());
        head.copy_from_slice(bytes);
        *self = tail;
        Ok(())
    }

    fn remaining(&self) -> usize {
        self.len()
    }

    unsafe fn with_slot<F>(&mut self, len: usize, write: F) -> Result<NonZeroUsize, DidntWrite>
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        if len > self.len() {
            return Err(DidntWrite);
        }
        let written = write(&mut self[..len]);
        // SAFETY: `written <= len` is guaranteed by function contract
        *self = unsafe { mem::take(self).get_unchecked_mut(written..) };
        NonZeroUsize::new(written).ok_or(DidntWrite)
    }
}

// Borrowed slices are consumed front to back.
impl HasReader for &[u8] {
    type Reader = Self;

    fn reader(self) -> Self::Reader {
        self
    }
}

impl Reader for &[u8] {
    fn read(&mut self, into: &mut [u8]) -> Result<NonZeroUsize, DidntRead> {
        let len = NonZeroUsize::new(self.len().min(into.len())).ok_or(DidntRead)?;
        let (head, tail) = self.split_at(len.get());
        into[..len.get()].copy_from_slice(head);
        *self = tail;
        Ok(len)
    }

    fn read_exact(&mut self, into: &mut [u8]) -> Result<(), DidntRead> {
        if self.len() < into.len() {
            return Err(DidntRead);
        }
        let (head, tail) = self.split_at(into.len());
        into.copy_from_slice(head);
        *self = tail;
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8, DidntRead> {
        let (&byte, tail) = self.split_first().ok_or(DidntRead)?;
        *self = tail;
        Ok(byte)
    }

    fn remaining(&self) -> usize {
        self.len()
    }

    fn can_read(&self) -> bool {
        !self.is_empty()
    }
}
