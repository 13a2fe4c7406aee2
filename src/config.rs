use std::net::SocketAddr;
use std::time::Duration;

use anyhow::bail;
use rustc_hash::FxHashSet;
use sha2::{Digest, Sha256};

use crate::message::forwarding_header::HeaderCodec;
use crate::message::routable_id::NodeId;

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub local_node_id: NodeId,
    pub bind_addr: SocketAddr,

    pub overlay_name: String,
    /// identifies the overlay instance in every message's forwarding header. This is derived from
    ///  the overlay name by default, and it should only be set explicitly for interoperability
    ///  with nodes that derive it differently.
    pub overlay_hash: u32,
    pub config_sequence: u16,
    pub protocol_version: u8,
    pub initial_ttl: u8,

    /// the maximum size of a single message on the wire, including its forwarding header. Bigger
    ///  messages are fragmented.
    pub max_message_size: usize,
    /// the maximum payload size of a message reassembled from fragments
    pub max_reassembled_size: usize,
    /// the biggest frame payload a neighbor link transmits in one piece
    pub link_mtu: usize,
    /// bytes kept free in each fragment in addition to the header
    pub fragment_safety_margin: usize,

    pub request_timeout: Duration,
    /// reassembly of a fragmented message is abandoned if no fragment arrives for this long
    pub reassembly_timeout: Duration,

    pub min_ack_timeout: Duration,
    pub max_ack_timeout: Duration,
    /// ack timeout before the first RTT sample is available
    pub initial_ack_timeout: Duration,
    /// number of received sequence numbers remembered for building selective acks, 1..=32
    pub receive_history_len: usize,
    pub sequence_modulus: u64,

    /// Forwarding option types this node understands. Messages carrying a critical option
    ///  that is not in this set are rejected.
    pub recognized_forwarding_options: FxHashSet<u8>,
}

impl OverlayConfig {
    pub const DEFAULT_PROTOCOL_VERSION: u8 = 0x0a;

    pub fn new(local_node_id: NodeId, overlay_name: impl Into<String>, bind_addr: SocketAddr) -> OverlayConfig {
        let overlay_name = overlay_name.into();
        OverlayConfig {
            local_node_id,
            bind_addr,
            overlay_hash: Self::hash_overlay_name(&overlay_name),
            overlay_name,
            config_sequence: 0,
            protocol_version: Self::DEFAULT_PROTOCOL_VERSION,
            initial_ttl: 100,
            max_message_size: 5000,
            max_reassembled_size: 128 * 1024,
            link_mtu: 1472,
            fragment_safety_margin: 16,
            request_timeout: Duration::from_millis(5000),
            reassembly_timeout: Duration::from_secs(10),
            min_ack_timeout: Duration::from_millis(1000),
            max_ack_timeout: Duration::from_millis(10000),
            initial_ack_timeout: Duration::from_millis(3000),
            receive_history_len: 32,
            sequence_modulus: 1 << 24,
            recognized_forwarding_options: Default::default(),
        }
    }

    /// the first four bytes of the overlay name's SHA-256 hash
    pub fn hash_overlay_name(overlay_name: &str) -> u32 {
        let digest = Sha256::digest(overlay_name.as_bytes());
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    /// the size limit for messages sent over a single link
    pub fn effective_max_size(&self) -> usize {
        self.link_mtu.min(self.max_message_size)
    }

    pub fn header_codec(&self) -> HeaderCodec {
        HeaderCodec::new(self.recognized_forwarding_options.iter().copied())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.local_node_id.as_bytes().is_empty() {
            bail!("local node id must not be empty");
        }

        // three empty lists
        let min_size = HeaderCodec::FIXED_LEN + 3 * size_of::<u16>() + self.fragment_safety_margin;
        if self.max_message_size <= min_size {
            bail!("max message size {} leaves no room for a payload - it must be bigger than {}", self.max_message_size, min_size);
        }
        if self.link_mtu <= min_size {
            bail!("link MTU {} leaves no room for a payload - it must be bigger than {}", self.link_mtu, min_size);
        }
        if self.max_message_size > u32::MAX as usize {
            bail!("max message size {} does not fit the 32-bit length field", self.max_message_size);
        }

        if self.max_reassembled_size < self.max_message_size {
            bail!("max reassembled size {} is smaller than max message size {}", self.max_reassembled_size, self.max_message_size);
        }

        if self.min_ack_timeout > self.max_ack_timeout {
            bail!("min ack timeout {:?} is bigger than max ack timeout {:?}", self.min_ack_timeout, self.max_ack_timeout);
        }
        if self.min_ack_timeout.is_zero() {
            bail!("min ack timeout must be positive");
        }

        if !(1..=32).contains(&self.receive_history_len) {
            bail!("receive history length must be between 1 and 32, was {}", self.receive_history_len);
        }
        if self.sequence_modulus == 0 || self.sequence_modulus > 1 << 32 {
            bail!("sequence modulus must be between 1 and 2^32, was {}", self.sequence_modulus);
        }

        Ok(())
    }
}
