use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::util::buf_ext::BufExt;
use crate::util::var_field::{FieldWidth, VarField};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ForwardingFlags: u8 {
        /// a node that forwards the message must understand this option
        const FORWARD_CRITICAL = 0x01;
        /// the message's destination must understand this option
        const DESTINATION_CRITICAL = 0x02;
        const RESPONSE_COPY = 0x04;
    }
}

/// A forwarding option in a message's forwarding header. Options are opaque to this crate
///  except for their flags: unknown options are retained as they are and re-encoded when a message
///  is forwarded, unless they are marked critical.
///
/// ```ascii
/// 0: option type (u8)
/// 1: flags (u8)
/// 2: option data, with u16 length prefix
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingOption {
    pub option_type: u8,
    pub flags: ForwardingFlags,
    pub data: Bytes,
}

impl ForwardingOption {
    pub fn new(option_type: u8, flags: ForwardingFlags, data: impl Into<Bytes>) -> ForwardingOption {
        ForwardingOption {
            option_type,
            flags,
            data: data.into(),
        }
    }

    pub fn is_forward_critical(&self) -> bool {
        self.flags.contains(ForwardingFlags::FORWARD_CRITICAL)
    }

    pub fn is_destination_critical(&self) -> bool {
        self.flags.contains(ForwardingFlags::DESTINATION_CRITICAL)
    }

    pub fn is_response_copy(&self) -> bool {
        self.flags.contains(ForwardingFlags::RESPONSE_COPY)
    }

    pub fn is_critical(&self) -> bool {
        self.is_forward_critical() || self.is_destination_critical()
    }

    pub fn ser(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u8(self.option_type);
        buf.put_u8(self.flags.bits());
        VarField::write(buf, FieldWidth::U16, &self.data)
    }

    pub fn deser(buf: &mut impl Buf) -> Result<ForwardingOption, CodecError> {
        let option_type = buf.get_u8_checked()?;
        // unknown flag bits are kept so they survive re-encoding
        let flags = ForwardingFlags::from_bits_retain(buf.get_u8_checked()?);
        let data = VarField::read(buf, FieldWidth::U16)?;
        Ok(ForwardingOption {
            option_type,
            flags,
            data,
        })
    }
}
