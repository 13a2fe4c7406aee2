use std::collections::BTreeMap;

use thiserror::Error;

use crate::message::routable_id::{NodeId, RoutableId};

/// Errors raised while encoding or decoding wire structures. They are always scoped to a single
///  frame or message - a receiving task drops the offending data and carries on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated buffer: {needed} bytes needed, {remaining} remaining")]
    TruncatedBuffer { needed: usize, remaining: usize },

    #[error("field overflow: {written} bytes do not fit a {width}-byte length prefix")]
    FieldOverflow { written: usize, width: usize },

    #[error("unsupported destination type {0}")]
    UnsupportedDestinationType(u8),

    #[error("unsupported frame type {0}")]
    UnsupportedFrameType(u8),

    #[error("unsupported critical forwarding option {0}")]
    UnsupportedForwardingOption(u8),

    #[error("length mismatch: header declares {declared} bytes, buffer has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("fragment offset {0} exceeds the 16-bit offset field")]
    FragmentOffsetOverflow(usize),

    #[error("message of {size} bytes exceeds the maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("fragment reassembly timed out for transaction {0}")]
    ReassemblyTimeout(u64),
}

/// Errors of a single send on a neighbor link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("frame {sequence} was not acknowledged in time")]
    UnackedFrame { sequence: u32 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("link closed")]
    Closed,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("no route to {0:?}")]
    NoRoute(RoutableId),

    #[error("message has an empty destination list")]
    NoDestination,

    /// every attempted next hop failed - carries the cause per neighbor
    #[error("forwarding failed on all next hops: {0:?}")]
    AllHopsFailed(BTreeMap<NodeId, LinkError>),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// The ways a submitted request can fail, as seen by the caller awaiting its answer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request {0} timed out")]
    RequestTimeout(u64),

    #[error("answer to request {transaction_id} came from {actual:?}, expected {expected:?}")]
    ProvenanceMismatch {
        transaction_id: u64,
        expected: Option<NodeId>,
        actual: NodeId,
    },

    #[error("transaction id {0} is already pending")]
    DuplicateTransactionId(u64),

    #[error("request was cancelled")]
    Cancelled,

    #[error(transparent)]
    Route(#[from] RouteError),
}
