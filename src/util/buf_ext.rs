use bytes::{Buf, Bytes};

use crate::error::CodecError;


macro_rules! get_checked_impl {
    ($checked_getter: ident, $ty:ty, $getter: ident) => {
        fn $checked_getter(&mut self) -> Result<$ty, CodecError> {
            self.ensure_remaining(size_of::<$ty>())?;
            Ok(self.$getter())
        }
    }
}

/// Bounds-checked reads on top of [Buf]. All multi-byte numbers are in network byte order.
///
/// NB: `bytes` has `try_get_*` methods of its own in recent versions, so the `_checked` suffix
///      avoids ambiguity when both traits are in scope
pub trait BufExt: Buf {
    fn ensure_remaining(&self, needed: usize) -> Result<(), CodecError> {
        if self.remaining() < needed {
            return Err(CodecError::TruncatedBuffer { needed, remaining: self.remaining() });
        }
        Ok(())
    }

    get_checked_impl!(get_u8_checked, u8, get_u8);
    get_checked_impl!(get_u16_checked, u16, get_u16);
    get_checked_impl!(get_u32_checked, u32, get_u32);
    get_checked_impl!(get_u64_checked, u64, get_u64);

    /// reads an unsigned big-endian number of `num_bytes` (at most 8) bytes
    fn get_uint_checked(&mut self, num_bytes: usize) -> Result<u64, CodecError> {
        self.ensure_remaining(num_bytes)?;
        Ok(self.get_uint(num_bytes))
    }

    /// NB: This is zero-copy if the underlying buffer is [Bytes]
    fn copy_to_bytes_checked(&mut self, len: usize) -> Result<Bytes, CodecError> {
        self.ensure_remaining(len)?;
        Ok(self.copy_to_bytes(len))
    }
}

impl <T: Buf> BufExt for T {
}
