use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::OverlayConfig;
use crate::error::CodecError;
use crate::link::message_dispatcher::MessageDispatcher;
use crate::message::fragmentation::Reassembler;
use crate::message::message::{Message, MessageCodec, RawMessage};
use crate::message::message_builder::MessageBuilder;
use crate::message::routable_id::{NodeId, RoutableId};
use crate::routing::correlator::RequestCorrelator;
use crate::routing::router::Router;
use crate::routing::routing_table::TopologyPlugin;
use crate::util::random::{Random, RngRandom};

/// Handles requests addressed to this node
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LocalHandler: Send + Sync + 'static {
    /// returns the answer's body, or `None` if the request should not be answered
    async fn on_request(&self, request: &Message) -> Option<Bytes>;
}

/// Processes every message delivered by a neighbor link: it reassembles fragments, records the
///  neighbor in the via list, and then either handles the message locally or forwards it.
///
/// Answers for this node go to the [RequestCorrelator], requests for this node go to the
///  [LocalHandler]. Transit messages are forwarded with a decremented TTL, and they are
///  dropped once the TTL is exhausted.
pub struct InboundDispatcher<R: Random = RngRandom> {
    config: Arc<OverlayConfig>,
    codec: MessageCodec,
    reassembler: Mutex<Reassembler>,
    builder: MessageBuilder,
    router: Arc<Router>,
    topology: Arc<dyn TopologyPlugin>,
    correlator: Arc<RequestCorrelator<R>>,
    local_handler: Arc<dyn LocalHandler>,
}

impl <R: Random> InboundDispatcher<R> {
    pub fn new(
        config: Arc<OverlayConfig>,
        router: Arc<Router>,
        topology: Arc<dyn TopologyPlugin>,
        correlator: Arc<RequestCorrelator<R>>,
        local_handler: Arc<dyn LocalHandler>,
    ) -> InboundDispatcher<R> {
        InboundDispatcher {
            codec: MessageCodec::new(config.header_codec()),
            reassembler: Mutex::new(Reassembler::new(config.max_reassembled_size, config.reassembly_timeout)),
            builder: MessageBuilder::new(config.clone()),
            config,
            router,
            topology,
            correlator,
            local_handler,
        }
    }

    pub fn num_pending_reassemblies(&self) -> usize {
        self.lock_reassembler().num_pending()
    }

    fn lock_reassembler(&self) -> std::sync::MutexGuard<'_, Reassembler> {
        self.reassembler.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn _on_message(&self, sender: NodeId, msg_buf: Bytes) -> anyhow::Result<()> {
        let raw = self.codec.decode_raw(msg_buf)?;
        if raw.invalid_token {
            warn!("message from {:?} has an invalid token - dropping", sender);
            return Ok(());
        }

        let mut raw = match self.reassemble(&sender, raw)? {
            Some(raw) => raw,
            None => return Ok(()),
        };

        raw.header.via_list.push(sender.clone().into());

        let local_id = RoutableId::from(self.config.local_node_id.clone());
        if raw.header.destination_list.len() > 1 && raw.header.next_hop() == Some(&local_id) {
            raw.header.destination_list.remove(0);
        }

        let is_local = match raw.header.destination_list.as_slice() {
            [] => {
                debug!("message {} from {:?} has no destination - dropping", raw.header.transaction_id, sender);
                return Ok(());
            }
            [destination] => self.is_local(destination),
            _ => false,
        };

        if is_local {
            self.on_local_message(sender, raw).await
        }
        else {
            self.forward(raw).await;
            Ok(())
        }
    }

    fn reassemble(&self, sender: &NodeId, raw: RawMessage) -> Result<Option<RawMessage>, CodecError> {
        let now = Instant::now();
        let mut reassembler = self.lock_reassembler();
        for (fragment_sender, e) in reassembler.expire(now) {
            debug!("abandoning fragments from {:?}: {}", fragment_sender, e);
        }
        reassembler.on_fragment(sender, raw, now)
    }

    /// A node id is local only if it is this node's id. For other ids, this node is responsible
    ///  if it is closer to the id than all its neighbors.
    fn is_local(&self, destination: &RoutableId) -> bool {
        let local_node_id = &self.config.local_node_id;
        match destination {
            RoutableId::Node(node_id) => node_id == local_node_id,
            _ => {
                let mut candidates = self.router.routing_table().neighbors();
                candidates.push(local_node_id.clone());
                self.topology.closer_id(destination, &candidates).as_ref() == Some(local_node_id)
            }
        }
    }

    /// Handles a message addressed to this node.
    ///
    /// An answer is attributed to the first entry of its via list. That entry is written by the
    ///  answering node's first hop and is not authenticated here: it can be trusted only because
    ///  the message's signature is verified outside this crate, before the answer reaches the
    ///  requesting application. Without that verification, a direct neighbor could put any node
    ///  id there and pass the provenance check for that node.
    async fn on_local_message(&self, sender: NodeId, raw: RawMessage) -> anyhow::Result<()> {
        let msg = Message::from_raw(raw)?;

        if msg.is_answer() {
            let origin = msg.header.via_list.first()
                .and_then(|id| id.as_node_id())
                .cloned()
                .unwrap_or(sender);
            self.correlator.on_answer(msg, origin);
            return Ok(());
        }

        trace!("handling request {} locally", msg.transaction_id());
        let body = match self.local_handler.on_request(&msg).await {
            Some(body) => body,
            None => return Ok(()),
        };

        let answer = self.builder.answer_for(&msg, body);
        match self.router.send(&answer).await {
            Ok(outcome) if outcome.is_partial_failure() => debug!("answer {} partially failed: {:?}", answer.transaction_id(), outcome.failed),
            Ok(_) => {}
            Err(e) => debug!("could not send answer {}: {}", answer.transaction_id(), e),
        }
        Ok(())
    }

    async fn forward(&self, mut raw: RawMessage) {
        if raw.header.ttl == 0 {
            debug!("TTL of message {} is exhausted - dropping", raw.header.transaction_id);
            return;
        }
        raw.header.ttl -= 1;

        trace!("forwarding message {} to {:?}", raw.header.transaction_id, raw.header.next_hop());
        if let Err(e) = self.router.forward(&raw).await {
            debug!("could not forward message {}: {}", raw.header.transaction_id, e);
        }
    }
}

#[async_trait]
impl <R: Random> MessageDispatcher for InboundDispatcher<R> {
    async fn on_message(&self, sender: NodeId, msg_buf: Bytes) {
        if let Err(e) = self._on_message(sender.clone(), msg_buf).await {
            warn!("error handling message from {:?}: {}", sender, e);
        }
    }
}
