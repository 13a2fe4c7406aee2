use bytes::{Buf, BufMut, BytesMut};
use rustc_hash::FxHashSet;
use tracing::trace;

use crate::error::CodecError;
use crate::message::forwarding_option::ForwardingOption;
use crate::message::routable_id::RoutableId;
use crate::util::buf_ext::BufExt;
use crate::util::var_field::{FieldWidth, VarField};

/// Routing metadata that is prepended to every message. See the crate documentation for the
///  wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingHeader {
    pub overlay_hash: u32,
    pub config_sequence: u16,
    pub version: u8,
    /// decremented hop by hop, a transit message with TTL 0 is dropped
    pub ttl: u8,
    pub is_last_fragment: bool,
    /// offset of this fragment's payload within the reassembled payload
    pub fragment_offset: u16,
    pub transaction_id: u64,
    pub max_response_length: u32,
    /// nodes the message passed through - the last entry is the immediate sender
    pub via_list: Vec<RoutableId>,
    /// the first entry is the next hop, the last entry is the final destination
    pub destination_list: Vec<RoutableId>,
    pub forwarding_options: Vec<ForwardingOption>,
}

impl ForwardingHeader {
    pub fn is_fragment(&self) -> bool {
        !self.is_last_fragment || self.fragment_offset != 0
    }

    pub fn next_hop(&self) -> Option<&RoutableId> {
        self.destination_list.first()
    }

    pub fn final_destination(&self) -> Option<&RoutableId> {
        self.destination_list.last()
    }

    pub fn immediate_sender(&self) -> Option<&RoutableId> {
        self.via_list.last()
    }
}

/// The result of decoding a header: the header itself plus the per-message framing data that is
///  not part of the header's logical content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHeader {
    pub header: ForwardingHeader,
    /// length of the entire message, including the header
    pub total_length: u32,
    /// length of the encoded header, i.e. the offset of the payload
    pub header_length: usize,
    /// The magic token did not match. This is advisory: it is up to the caller to decide whether
    ///  to drop the message.
    pub invalid_token: bool,
}

impl DecodedHeader {
    pub fn payload_length(&self) -> usize {
        (self.total_length as usize).saturating_sub(self.header_length)
    }
}

/// The reserved total-length field of an encoded header. The message's total length is known
///  only after the payload is written, so the caller patches it in afterwards.
#[must_use]
#[derive(Debug)]
pub struct TotalLengthSlot {
    /// offset of the header's first byte
    message_start: usize,
    /// offset of the length field
    offset: usize,
}

impl TotalLengthSlot {
    pub fn backpatch(self, buf: &mut BytesMut) -> Result<u32, CodecError> {
        let total = buf.len() - self.message_start;
        let total: u32 = total.try_into()
            .map_err(|_| CodecError::FieldOverflow { written: total, width: size_of::<u32>() })?;

        buf[self.offset..self.offset + size_of::<u32>()].copy_from_slice(&total.to_be_bytes());
        Ok(total)
    }
}

/// Encodes and decodes [ForwardingHeader]s. The set of forwarding option types this node
///  understands is registered at construction time: decoding a header with an unknown critical
///  option fails.
#[derive(Debug, Clone, Default)]
pub struct HeaderCodec {
    recognized_forwarding_options: FxHashSet<u8>,
}

impl HeaderCodec {
    pub const TOKEN: u32 = 0xd2454c4f;

    pub const FRAGMENT_SENTINEL: u16 = 0x8000;
    pub const FRAGMENT_LAST: u16 = 0x4000;

    /// length of the header without via list, destination list and forwarding options
    pub const FIXED_LEN: usize = 32;
    pub const TOTAL_LENGTH_OFFSET: usize = 16;

    pub fn new(recognized_forwarding_options: impl IntoIterator<Item = u8>) -> HeaderCodec {
        HeaderCodec {
            recognized_forwarding_options: recognized_forwarding_options.into_iter().collect(),
        }
    }

    pub fn encode(&self, header: &ForwardingHeader, buf: &mut BytesMut) -> Result<TotalLengthSlot, CodecError> {
        let message_start = buf.len();

        buf.put_u32(Self::TOKEN);
        buf.put_u32(header.overlay_hash);
        buf.put_u16(header.config_sequence);
        buf.put_u8(header.version);
        buf.put_u8(header.ttl);

        let mut fragment_word = Self::FRAGMENT_SENTINEL;
        if header.is_last_fragment {
            fragment_word |= Self::FRAGMENT_LAST;
        }
        buf.put_u16(fragment_word);
        buf.put_u16(header.fragment_offset);

        let total_length_offset = buf.len();
        debug_assert_eq!(total_length_offset - message_start, Self::TOTAL_LENGTH_OFFSET);
        buf.put_u32(0);

        buf.put_u64(header.transaction_id);
        buf.put_u32(header.max_response_length);

        RoutableId::ser_list(&header.via_list, buf)?;
        RoutableId::ser_list(&header.destination_list, buf)?;

        let options_handle = VarField::allocate(buf, FieldWidth::U16);
        for option in &header.forwarding_options {
            option.ser(buf)?;
        }
        VarField::finalize(buf, options_handle)?;

        Ok(TotalLengthSlot {
            message_start,
            offset: total_length_offset,
        })
    }

    /// the length of a header's encoded representation
    pub fn encoded_len(&self, header: &ForwardingHeader) -> Result<usize, CodecError> {
        let mut buf = BytesMut::new();
        let _ = self.encode(header, &mut buf)?;
        Ok(buf.len())
    }

    pub fn decode(&self, buf: &mut impl Buf) -> Result<DecodedHeader, CodecError> {
        let initial_remaining = buf.remaining();
        buf.ensure_remaining(Self::FIXED_LEN)?;

        let token = buf.get_u32();
        let overlay_hash = buf.get_u32();
        let config_sequence = buf.get_u16();
        let version = buf.get_u8();
        let ttl = buf.get_u8();
        let fragment_word = buf.get_u16();
        let fragment_offset = buf.get_u16();
        let total_length = buf.get_u32();
        let transaction_id = buf.get_u64();
        let max_response_length = buf.get_u32();

        let via_list = RoutableId::deser_list(buf)?;
        let destination_list = RoutableId::deser_list(buf)?;
        let forwarding_options = self.decode_forwarding_options(buf)?;

        let invalid_token = token != Self::TOKEN;
        if invalid_token {
            trace!("header token {:08x} does not match", token);
        }

        Ok(DecodedHeader {
            header: ForwardingHeader {
                overlay_hash,
                config_sequence,
                version,
                ttl,
                is_last_fragment: fragment_word & Self::FRAGMENT_LAST != 0,
                fragment_offset,
                transaction_id,
                max_response_length,
                via_list,
                destination_list,
                forwarding_options,
            },
            total_length,
            header_length: initial_remaining - buf.remaining(),
            invalid_token,
        })
    }

    fn decode_forwarding_options(&self, buf: &mut impl Buf) -> Result<Vec<ForwardingOption>, CodecError> {
        let mut options_buf = VarField::read(buf, FieldWidth::U16)?;
        let mut result = Vec::new();
        while options_buf.has_remaining() {
            let option = ForwardingOption::deser(&mut options_buf)?;
            if option.is_critical() && !self.recognized_forwarding_options.contains(&option.option_type) {
                return Err(CodecError::UnsupportedForwardingOption(option.option_type));
            }
            result.push(option);
        }
        Ok(result)
    }
}
