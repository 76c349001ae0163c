use super::{FrameCodec, HeaderError, LCodec, RCodec, WCodec};
use crate::buffers::{
    reader::Reader,
    writer::{DidntWrite, Writer},
};

pub(crate) const VLE_LEN_MAX: usize = vle_len(u32::MAX);

// Bits of the last group that still fit in a u32
const VLE_LAST_MASK: u8 = 0x0F;

pub(crate) const fn vle_len(x: u32) -> usize {
    const B1: u32 = u32::MAX << 7;
    const B2: u32 = u32::MAX << (7 * 2);
    const B3: u32 = u32::MAX << (7 * 3);
    const B4: u32 = u32::MAX << (7 * 4);

    if (x & B1) == 0 {
        1
    } else if (x & B2) == 0 {
        2
    } else if (x & B3) == 0 {
        3
    } else if (x & B4) == 0 {
        4
    } else {
        5
    }
}

impl LCodec<u32> for FrameCodec {
    fn w_len(self, x: u32) -> usize {
        vle_len(x)
    }
}

impl<W> WCodec<u32, &mut W> for FrameCodec
where
    W: Writer,
{
    type Output = Result<(), DidntWrite>;

    fn write(self, writer: &mut W, mut x: u32) -> Self::Output {
        let write = move |buffer: &mut [u8]| {
            let mut len = 0;
            while (x & !0x7f_u32) != 0 {
                // SAFETY: buffer is `w_len(x)` long and x loses 7 bits every
                //         iteration, so the loop writes at most `w_len(x) - 1` bytes.
                unsafe {
                    *buffer.get_unchecked_mut(len) = (x as u8) | 0x80_u8;
                }
                len += 1;
                x >>= 7;
            }
            // SAFETY: the last group always fits in the slot: `len < w_len(x)`.
            unsafe {
                *buffer.get_unchecked_mut(len) = x as u8;
            }
            // The number of written bytes
            len + 1
        };
        // SAFETY: write algorithm writes exactly `w_len(x)` bytes.
        unsafe { writer.with_slot(self.w_len(x), write)? };
        Ok(())
    }
}

impl<R> RCodec<u32, &mut R> for FrameCodec
where
    R: Reader,
{
    type Error = HeaderError;

    fn read(self, reader: &mut R) -> Result<u32, Self::Error> {
        let mut v = 0;
        for i in 0..VLE_LEN_MAX {
            let b = reader.read_u8()?;
            if i == VLE_LEN_MAX - 1 && b & !VLE_LAST_MASK != 0 {
                // Still continued, or carrying bits beyond u32
                return Err(HeaderError::Overflow);
            }
            v |= ((b & 0x7f_u8) as u32) << (7 * i);
            if b & 0x80_u8 == 0 {
                return Ok(v);
            }
        }
        Err(HeaderError::Overflow)
    }
}
