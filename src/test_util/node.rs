use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::message::routable_id::{NodeId, ResourceId};

/// Convenience function for unit tests: creates a 16-byte [NodeId] based on a number, the same
///  number generating the same id and different numbers different ids. Ids are ordered like
///  their numbers.
pub fn test_node_id_from_number(number: u16) -> NodeId {
    NodeId::new(id_bytes(number))
}

pub fn test_resource_id_from_number(number: u16) -> ResourceId {
    ResourceId::new(id_bytes(number))
}

fn id_bytes(number: u16) -> Vec<u8> {
    let mut raw = vec![0u8; 16];
    raw[14..].copy_from_slice(&number.to_be_bytes());
    raw
}

/// a localhost address with an OS-assigned port
pub fn test_bind_addr() -> SocketAddr {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0).into()
}
