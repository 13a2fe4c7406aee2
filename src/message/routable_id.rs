use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::CodecError;
use crate::util::buf_ext::BufExt;
use crate::util::var_field::{FieldWidth, VarField};

/// Compares two byte strings as unsigned big-endian integers, i.e. leading zero bytes are
///  insignificant. Numerically equal strings of different raw length are ordered by raw length,
///  which keeps ordering consistent with byte-for-byte equality.
fn cmp_unsigned(a: &[u8], b: &[u8]) -> Ordering {
    fn significant(bytes: &[u8]) -> &[u8] {
        let first_non_zero = bytes.iter()
            .position(|&b| b != 0)
            .unwrap_or(bytes.len());
        &bytes[first_non_zero..]
    }

    let sig_a = significant(a);
    let sig_b = significant(b);

    sig_a.len().cmp(&sig_b.len())
        .then_with(|| sig_a.cmp(sig_b))
        .then_with(|| a.len().cmp(&b.len()))
}

fn fmt_hex(f: &mut Formatter<'_>, prefix: &str, bytes: &[u8]) -> std::fmt::Result {
    write!(f, "{}(", prefix)?;
    for b in bytes {
        write!(f, "{:02x}", b)?;
    }
    write!(f, ")")
}

macro_rules! id_type {
    ($name: ident, $debug_prefix: literal) => {
        #[derive(Clone, PartialEq, Eq, Hash)]
        pub struct $name(Bytes);

        impl $name {
            pub fn new(raw: impl Into<Bytes>) -> $name {
                $name(raw.into())
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                cmp_unsigned(&self.0, &other.0)
            }
        }
        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                fmt_hex(f, $debug_prefix, &self.0)
            }
        }
    }
}

id_type!(NodeId, "N");
id_type!(ResourceId, "R");
id_type!(OpaqueId, "O");

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DestinationType {
    Node = 1,
    Resource = 2,
    Opaque = 3,
}

/// An entry in a via list or destination list.
///
/// On the wire, this is a one-byte [DestinationType] tag followed by the raw id in a field with
///  a one-byte length prefix.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum RoutableId {
    Node(NodeId),
    Resource(ResourceId),
    Opaque(OpaqueId),
}

impl Debug for RoutableId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutableId::Node(id) => id.fmt(f),
            RoutableId::Resource(id) => id.fmt(f),
            RoutableId::Opaque(id) => id.fmt(f),
        }
    }
}

impl From<NodeId> for RoutableId {
    fn from(value: NodeId) -> Self {
        RoutableId::Node(value)
    }
}
impl From<ResourceId> for RoutableId {
    fn from(value: ResourceId) -> Self {
        RoutableId::Resource(value)
    }
}
impl From<OpaqueId> for RoutableId {
    fn from(value: OpaqueId) -> Self {
        RoutableId::Opaque(value)
    }
}

impl Ord for RoutableId {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_unsigned(self.as_bytes(), other.as_bytes())
            .then_with(|| u8::from(self.destination_type()).cmp(&u8::from(other.destination_type())))
    }
}
impl PartialOrd for RoutableId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl RoutableId {
    pub fn destination_type(&self) -> DestinationType {
        match self {
            RoutableId::Node(_) => DestinationType::Node,
            RoutableId::Resource(_) => DestinationType::Resource,
            RoutableId::Opaque(_) => DestinationType::Opaque,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RoutableId::Node(id) => id.as_bytes(),
            RoutableId::Resource(id) => id.as_bytes(),
            RoutableId::Opaque(id) => id.as_bytes(),
        }
    }

    pub fn as_node_id(&self) -> Option<&NodeId> {
        match self {
            RoutableId::Node(id) => Some(id),
            _ => None,
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u8(self.destination_type().into());
        VarField::write(buf, FieldWidth::U8, self.as_bytes())
    }

    pub fn deser(buf: &mut impl Buf) -> Result<RoutableId, CodecError> {
        let raw_type = buf.get_u8_checked()?;
        let destination_type = DestinationType::try_from(raw_type)
            .map_err(|_| CodecError::UnsupportedDestinationType(raw_type))?;

        let raw = VarField::read(buf, FieldWidth::U8)?;
        Ok(match destination_type {
            DestinationType::Node => RoutableId::Node(NodeId(raw)),
            DestinationType::Resource => RoutableId::Resource(ResourceId(raw)),
            DestinationType::Opaque => RoutableId::Opaque(OpaqueId(raw)),
        })
    }

    /// writes a list of ids into a single field with a two-byte length prefix
    pub fn ser_list(ids: &[RoutableId], buf: &mut BytesMut) -> Result<(), CodecError> {
        let handle = VarField::allocate(buf, FieldWidth::U16);
        for id in ids {
            id.ser(buf)?;
        }
        VarField::finalize(buf, handle)?;
        Ok(())
    }

    pub fn deser_list(buf: &mut impl Buf) -> Result<Vec<RoutableId>, CodecError> {
        let mut list_buf = VarField::read(buf, FieldWidth::U16)?;
        let mut result = Vec::new();
        while list_buf.has_remaining() {
            result.push(RoutableId::deser(&mut list_buf)?);
        }
        Ok(result)
    }
}
