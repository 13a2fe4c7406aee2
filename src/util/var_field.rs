//! Length-prefixed fields: a fixed-width big-endian length followed by exactly that many bytes
//!  of data. This is the single encoding primitive behind every variable-length structure on the
//!  wire (id lists, option lists, payloads, frame bodies).
//!
//! Writing is a two-step process. [VarField::allocate] reserves the length prefix at the end of
//!  the buffer, the caller appends the field's data, and [VarField::finalize] back-patches the
//!  actual number of bytes written into the reserved prefix. This allows nested structures to be
//!  written in a single pass without knowing their size up front.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::util::buf_ext::BufExt;

/// The width of a field's length prefix in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWidth {
    U8,
    U16,
    U24,
    U32,
    U64,
}
impl FieldWidth {
    pub const fn num_bytes(&self) -> usize {
        match self {
            FieldWidth::U8 => 1,
            FieldWidth::U16 => 2,
            FieldWidth::U24 => 3,
            FieldWidth::U32 => 4,
            FieldWidth::U64 => 8,
        }
    }

    /// the biggest data length that can be represented in a length prefix of this width
    pub const fn max_len(&self) -> u64 {
        match self {
            FieldWidth::U64 => u64::MAX,
            _ => (1u64 << (8 * self.num_bytes())) - 1,
        }
    }
}

/// A reservation for a length prefix inside a buffer, returned by [VarField::allocate]. It must
///  be passed to [VarField::finalize] once the field's data is written.
#[must_use]
#[derive(Debug)]
pub struct FieldHandle {
    start: usize,
    width: FieldWidth,
}

pub struct VarField;

impl VarField {
    pub fn allocate(buf: &mut BytesMut, width: FieldWidth) -> FieldHandle {
        let start = buf.len();
        buf.put_bytes(0, width.num_bytes());
        FieldHandle { start, width }
    }

    /// Writes the number of bytes appended since [VarField::allocate] into the reserved length
    ///  prefix, returning that number.
    pub fn finalize(buf: &mut BytesMut, handle: FieldHandle) -> Result<usize, CodecError> {
        let width = handle.width.num_bytes();
        let data_start = handle.start + width;
        debug_assert!(buf.len() >= data_start);

        let written = buf.len() - data_start;
        if written as u64 > handle.width.max_len() {
            return Err(CodecError::FieldOverflow { written, width });
        }

        let be_bytes = (written as u64).to_be_bytes();
        buf[handle.start..data_start].copy_from_slice(&be_bytes[be_bytes.len() - width..]);
        Ok(written)
    }

    /// convenience for the common case of a field with opaque data
    pub fn write(buf: &mut BytesMut, width: FieldWidth, data: &[u8]) -> Result<(), CodecError> {
        let handle = Self::allocate(buf, width);
        buf.put_slice(data);
        Self::finalize(buf, handle)?;
        Ok(())
    }

    /// Reads a field's length prefix and returns the field's data, advancing the buffer past it.
    ///  This does not copy if `buf` is [Bytes].
    pub fn read(buf: &mut impl Buf, width: FieldWidth) -> Result<Bytes, CodecError> {
        let len = buf.get_uint_checked(width.num_bytes())?;
        let len: usize = match len.try_into() {
            Ok(len) => len,
            Err(_) => return Err(CodecError::TruncatedBuffer { needed: usize::MAX, remaining: buf.remaining() }),
        };
        buf.copy_to_bytes_checked(len)
    }
}
