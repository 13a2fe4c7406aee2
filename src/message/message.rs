use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::message::forwarding_header::{ForwardingHeader, HeaderCodec};
use crate::util::buf_ext::BufExt;
use crate::util::var_field::{FieldWidth, VarField};

/// Identifies a message's kind. Requests have odd codes, the corresponding answer has the
///  request's code plus one. `0xffff` is reserved for error answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageCode(pub u16);

impl MessageCode {
    pub const ERROR: MessageCode = MessageCode(0xffff);

    pub fn is_error(&self) -> bool {
        *self == Self::ERROR
    }

    pub fn is_request(&self) -> bool {
        self.0 % 2 == 1 && !self.is_error()
    }

    pub fn is_answer(&self) -> bool {
        !self.is_request()
    }

    /// the code of the answer corresponding to this request code
    pub fn answer_code(&self) -> MessageCode {
        MessageCode(self.0.wrapping_add(1))
    }
}

/// The message's content region. Its body and extensions are opaque to the transport layer.
///
/// ```ascii
/// 0: message code (u16)
/// 2: message body, with u32 length prefix
/// *: extensions, with u32 length prefix
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub message_code: MessageCode,
    pub body: Bytes,
    pub extensions: Bytes,
}

impl Content {
    pub fn new(message_code: MessageCode, body: impl Into<Bytes>) -> Content {
        Content {
            message_code,
            body: body.into(),
            extensions: Bytes::new(),
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.message_code.0);
        VarField::write(buf, FieldWidth::U32, &self.body)?;
        VarField::write(buf, FieldWidth::U32, &self.extensions)
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Content, CodecError> {
        let message_code = MessageCode(buf.get_u16_checked()?);
        let body = VarField::read(buf, FieldWidth::U32)?;
        let extensions = VarField::read(buf, FieldWidth::U32)?;
        Ok(Content {
            message_code,
            body,
            extensions,
        })
    }
}

/// A message with its payload (content and security block) kept as opaque bytes. This is the
///  representation for forwarding and fragmentation, which never look inside the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub header: ForwardingHeader,
    pub invalid_token: bool,
    pub payload: Bytes,
}

impl RawMessage {
    pub fn new(header: ForwardingHeader, payload: impl Into<Bytes>) -> RawMessage {
        RawMessage {
            header,
            invalid_token: false,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: ForwardingHeader,
    pub content: Content,
    /// opaque to the transport layer
    pub security_block: Bytes,
}

impl Message {
    pub fn is_request(&self) -> bool {
        self.content.message_code.is_request()
    }

    pub fn is_answer(&self) -> bool {
        self.content.message_code.is_answer()
    }

    pub fn transaction_id(&self) -> u64 {
        self.header.transaction_id
    }

    pub fn payload(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::new();
        self.content.ser(&mut buf)?;
        buf.put_slice(&self.security_block);
        Ok(buf.freeze())
    }

    pub fn to_raw(&self) -> Result<RawMessage, CodecError> {
        Ok(RawMessage::new(self.header.clone(), self.payload()?))
    }

    /// Interprets a raw message's payload. Everything after the content is the security block.
    pub fn from_raw(raw: RawMessage) -> Result<Message, CodecError> {
        let mut payload = raw.payload;
        let content = Content::deser(&mut payload)?;
        Ok(Message {
            header: raw.header,
            content,
            security_block: payload,
        })
    }
}

/// Composes a header and a payload into a wire message, and decomposes it again
#[derive(Debug, Clone, Default)]
pub struct MessageCodec {
    header_codec: HeaderCodec,
}

impl MessageCodec {
    pub fn new(header_codec: HeaderCodec) -> MessageCodec {
        MessageCodec { header_codec }
    }

    pub fn header_codec(&self) -> &HeaderCodec {
        &self.header_codec
    }

    pub fn encode_raw(&self, raw: &RawMessage, buf: &mut BytesMut) -> Result<u32, CodecError> {
        let slot = self.header_codec.encode(&raw.header, buf)?;
        buf.put_slice(&raw.payload);
        slot.backpatch(buf)
    }

    pub fn encode(&self, msg: &Message) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::new();
        let slot = self.header_codec.encode(&msg.header, &mut buf)?;
        msg.content.ser(&mut buf)?;
        buf.put_slice(&msg.security_block);
        slot.backpatch(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decodes a single message that must span the entire buffer
    pub fn decode_raw(&self, mut buf: Bytes) -> Result<RawMessage, CodecError> {
        let actual = buf.len();
        let decoded = self.header_codec.decode(&mut buf)?;

        let declared = decoded.total_length as usize;
        if declared < decoded.header_length {
            return Err(CodecError::LengthMismatch { declared, actual });
        }
        let payload_length = decoded.payload_length();
        if buf.remaining() < payload_length {
            return Err(CodecError::TruncatedBuffer { needed: payload_length, remaining: buf.remaining() });
        }
        if buf.remaining() > payload_length {
            return Err(CodecError::LengthMismatch { declared, actual });
        }

        Ok(RawMessage {
            header: decoded.header,
            invalid_token: decoded.invalid_token,
            payload: buf,
        })
    }

    pub fn decode(&self, buf: Bytes) -> Result<Message, CodecError> {
        Message::from_raw(self.decode_raw(buf)?)
    }
}
