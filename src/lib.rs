//! This is the transport core of a RELOAD style peer-to-peer overlay. It encodes and decodes
//!  overlay messages, transmits them reliably over UDP links to neighbors, routes them hop by
//!  hop, and matches answers to the requests that caused them.
//!
//! Overlay algorithms (which neighbors to have, which ids are close to each other) are plugged
//!  in through the [routing::routing_table::RoutingTable] and
//!  [routing::routing_table::TopologyPlugin] traits.
//!
//! ## Message format
//!
//! Every message starts with a forwarding header. All numbers are big-endian.
//!
//! ```ascii
//!  0: token 0xd2454c4f (u32)
//!  4: overlay hash (u32) - first 4 bytes of the overlay name's SHA-256 hash
//!  8: configuration sequence (u16)
//! 10: protocol version (u8)
//! 11: TTL (u8)
//! 12: fragment word (u16): 0x8000 is always set, 0x4000 marks the last fragment
//! 14: fragment offset (u16)
//! 16: total message length including the header (u32)
//! 20: transaction id (u64)
//! 28: max response length (u32)
//! 32: via list, with u16 length prefix
//!  *: destination list, with u16 length prefix
//!  *: forwarding options, with u16 length prefix
//! ```
//!
//! Via list and destination list entries are a destination type (u8: 1 = node, 2 = resource,
//!  3 = opaque) followed by the id with u8 length prefix.
//!
//! The header is followed by the message's content (message code, body and extensions) and a
//!  security block that is opaque to the transport.
//!
//! ## Frames
//!
//! Messages travel between neighbors as the payload of data frames. The receiver acknowledges
//!  every data frame, and each ack carries a bit mask of recently received frames.
//!
//! ```ascii
//! data frame:
//!  0: frame type 128 (u8)
//!  1: sequence number (u32)
//!  5: payload, with u24 length prefix
//!
//! ack frame:
//!  0: frame type 129 (u8)
//!  1: acknowledged sequence number (u32)
//!  5: received mask (u32) - bit i is set if sequence number (ack - i) was received
//! ```

pub mod config;
pub mod error;
pub mod link;
pub mod message;
pub mod routing;
pub mod util;
pub mod test_util;
