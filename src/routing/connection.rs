use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;

use crate::error::LinkError;
use crate::message::routable_id::NodeId;

/// A link to a directly connected neighbor, as seen by the router
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// the neighbor's authenticated node id
    fn neighbor(&self) -> NodeId;

    /// the biggest encoded message this connection transmits without fragmentation
    fn mtu(&self) -> usize;

    /// Transmits an encoded message, completing once the neighbor acknowledged it
    async fn send(&self, message: Bytes) -> Result<(), LinkError>;
}
