use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::CodecError;
use crate::util::buf_ext::BufExt;
use crate::util::var_field::{FieldWidth, VarField};

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Data = 128,
    Ack = 129,
}

/// A link layer frame.
///
/// ```ascii
/// Data:
/// 0: frame type 128 (u8)
/// 1: sequence number (u32)
/// 5: payload, with u24 length prefix
///
/// Ack:
/// 0: frame type 129 (u8)
/// 1: acknowledged sequence number (u32)
/// 5: received mask (u32)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        sequence: u32,
        payload: Bytes,
    },
    Ack {
        ack_sequence: u32,
        /// bit `i` is set iff `ack_sequence - i` was received, for `0 < i < 32`
        received_mask: u32,
    },
}

impl Frame {
    /// bytes a data frame adds to its payload
    pub const DATA_OVERHEAD: usize = 1 + size_of::<u32>() + 3;
    pub const ACK_LEN: usize = 1 + 2 * size_of::<u32>();

    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Data { .. } => FrameType::Data,
            Frame::Ack { .. } => FrameType::Ack,
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u8(self.frame_type().into());
        match self {
            Frame::Data { sequence, payload } => {
                buf.put_u32(*sequence);
                VarField::write(buf, FieldWidth::U24, payload)
            }
            Frame::Ack { ack_sequence, received_mask } => {
                buf.put_u32(*ack_sequence);
                buf.put_u32(*received_mask);
                Ok(())
            }
        }
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Frame, CodecError> {
        let raw_type = buf.get_u8_checked()?;
        let frame_type = FrameType::try_from(raw_type)
            .map_err(|_| CodecError::UnsupportedFrameType(raw_type))?;

        match frame_type {
            FrameType::Data => {
                let sequence = buf.get_u32_checked()?;
                let payload = VarField::read(buf, FieldWidth::U24)?;
                Ok(Frame::Data { sequence, payload })
            }
            FrameType::Ack => {
                let ack_sequence = buf.get_u32_checked()?;
                let received_mask = buf.get_u32_checked()?;
                Ok(Frame::Ack { ack_sequence, received_mask })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::data(Frame::Data { sequence: 0x010203, payload: Bytes::from_static(b"xy") }, vec![128, 0, 1, 2, 3, 0, 0, 2, b'x', b'y'])]
    #[case::empty_data(Frame::Data { sequence: 0, payload: Bytes::new() }, vec![128, 0, 0, 0, 0, 0, 0, 0])]
    #[case::ack(Frame::Ack { ack_sequence: 7, received_mask: 0x24 }, vec![129, 0, 0, 0, 7, 0, 0, 0, 0x24])]
    fn test_ser_deser(#[case] frame: Frame, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        frame.ser(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), expected.as_slice());

        let mut read_buf = buf.freeze();
        assert_eq!(Frame::deser(&mut read_buf).unwrap(), frame);
        assert!(read_buf.is_empty());
    }

    #[test]
    fn test_overhead() {
        let mut buf = BytesMut::new();
        Frame::Data { sequence: 1, payload: Bytes::from_static(b"abc") }.ser(&mut buf).unwrap();
        assert_eq!(buf.len(), 3 + Frame::DATA_OVERHEAD);

        let mut buf = BytesMut::new();
        Frame::Ack { ack_sequence: 1, received_mask: 0 }.ser(&mut buf).unwrap();
        assert_eq!(buf.len(), Frame::ACK_LEN);
    }

    #[rstest]
    #[case::unknown_type(vec![1, 0, 0, 0, 0], CodecError::UnsupportedFrameType(1))]
    #[case::empty(vec![], CodecError::TruncatedBuffer { needed: 1, remaining: 0 })]
    #[case::truncated_ack(vec![129, 0, 0, 0, 7, 0, 0], CodecError::TruncatedBuffer { needed: 4, remaining: 2 })]
    #[case::truncated_payload(vec![128, 0, 0, 0, 1, 0, 0, 5, 1], CodecError::TruncatedBuffer { needed: 5, remaining: 1 })]
    fn test_deser_error(#[case] data: Vec<u8>, #[case] expected: CodecError) {
        let mut buf: &[u8] = &data;
        assert_eq!(Frame::deser(&mut buf), Err(expected));
    }
}
