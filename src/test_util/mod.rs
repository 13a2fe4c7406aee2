//! Utilities for testing code built on the transport core. They are used by the crate's own
//!  tests, and they are exported so applications can test their routing and topology code
//!  against the same helpers.

pub mod connection;
pub mod node;
pub mod routing_table;
