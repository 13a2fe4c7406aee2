use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::OverlayConfig;
use crate::error::{CodecError, LinkError, RouteError};
use crate::message::fragmentation::Fragmenter;
use crate::message::message::{Message, MessageCodec, RawMessage};
use crate::message::routable_id::NodeId;
use crate::routing::connection::Connection;
use crate::routing::routing_table::RoutingTable;

/// The aggregated result of sending a message to all next hops. This is returned only if at
///  least one hop succeeded, so a non-empty `failed` map means partial failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardOutcome {
    pub succeeded: Vec<NodeId>,
    pub failed: BTreeMap<NodeId, LinkError>,
}

impl ForwardOutcome {
    pub fn is_partial_failure(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// The per-hop sends of a dispatched message, which are running concurrently
#[must_use]
pub struct PendingForward {
    hops: Vec<(NodeId, JoinHandle<Result<(), LinkError>>)>,
}

impl PendingForward {
    pub fn num_hops(&self) -> usize {
        self.hops.len()
    }

    /// Waits for every hop's send to settle. This fails only if every hop failed.
    pub async fn outcome(self) -> Result<ForwardOutcome, RouteError> {
        let mut succeeded = Vec::new();
        let mut failed = BTreeMap::new();

        for (neighbor, handle) in self.hops {
            match handle.await {
                Ok(Ok(())) => succeeded.push(neighbor),
                Ok(Err(e)) => {
                    debug!("sending to {:?} failed: {}", neighbor, e);
                    failed.insert(neighbor, e);
                }
                Err(e) => {
                    debug!("send task for {:?} failed: {}", neighbor, e);
                    failed.insert(neighbor, LinkError::Transport(e.to_string()));
                }
            }
        }

        if succeeded.is_empty() {
            return Err(RouteError::AllHopsFailed(failed));
        }
        Ok(ForwardOutcome { succeeded, failed })
    }
}

/// Sends messages to all next hops the routing table has for their destination. A message that
///  does not fit a connection's MTU is fragmented for that connection, and a hop counts as
///  successful only if all fragments were acknowledged.
pub struct Router {
    config: Arc<OverlayConfig>,
    routing_table: Arc<dyn RoutingTable>,
    codec: MessageCodec,
    fragmenter: Fragmenter,
}

impl Router {
    pub fn new(config: Arc<OverlayConfig>, routing_table: Arc<dyn RoutingTable>) -> Router {
        Router {
            codec: MessageCodec::new(config.header_codec()),
            fragmenter: Fragmenter::new(config.header_codec(), config.fragment_safety_margin),
            config,
            routing_table,
        }
    }

    pub fn routing_table(&self) -> &Arc<dyn RoutingTable> {
        &self.routing_table
    }

    /// Resolves the message's next hops and starts sending to all of them. Failure to find a
    ///  next hop is reported immediately.
    pub fn dispatch(&self, raw: &RawMessage) -> Result<PendingForward, RouteError> {
        let destination = raw.header.next_hop()
            .ok_or(RouteError::NoDestination)?;

        let connections = self.routing_table.next_hops(destination);
        if connections.is_empty() {
            debug!("no route to {:?}", destination);
            return Err(RouteError::NoRoute(destination.clone()));
        }

        // encode everything before starting to send so that encoding errors fail the dispatch
        let mut per_hop = Vec::with_capacity(connections.len());
        for connection in connections {
            let max_size = connection.mtu().min(self.config.max_message_size);
            let bufs = self.encode_fragments(raw, max_size)?;
            per_hop.push((connection, bufs));
        }

        let hops = per_hop.into_iter()
            .map(|(connection, bufs)| {
                let neighbor = connection.neighbor();
                trace!("sending message {} to {:?} in {} frame(s)", raw.header.transaction_id, neighbor, bufs.len());
                (neighbor, tokio::spawn(Self::send_to_hop(connection, bufs)))
            })
            .collect();
        Ok(PendingForward { hops })
    }

    async fn send_to_hop(connection: Arc<dyn Connection>, bufs: Vec<Bytes>) -> Result<(), LinkError> {
        for buf in bufs {
            connection.send(buf).await?;
        }
        Ok(())
    }

    fn encode_fragments(&self, raw: &RawMessage, max_size: usize) -> Result<Vec<Bytes>, CodecError> {
        self.fragmenter.split(raw, max_size)?
            .iter()
            .map(|fragment| {
                let mut buf = BytesMut::new();
                self.codec.encode_raw(fragment, &mut buf)?;
                Ok(buf.freeze())
            })
            .collect()
    }

    pub async fn send(&self, msg: &Message) -> Result<ForwardOutcome, RouteError> {
        let raw = msg.to_raw()?;
        self.dispatch(&raw)?
            .outcome().await
    }

    /// sends a transit message on to its next hops
    pub async fn forward(&self, raw: &RawMessage) -> Result<ForwardOutcome, RouteError> {
        self.dispatch(raw)?
            .outcome().await
    }
}
