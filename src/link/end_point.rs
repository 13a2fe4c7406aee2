use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;

use crate::config::OverlayConfig;
use crate::link::frame::Frame;
use crate::link::message_dispatcher::MessageDispatcher;
use crate::link::reliable_link::ReliableLink;
use crate::message::routable_id::NodeId;
use crate::routing::connection::Connection;

/// UdpEndPoint ties the link layer together: it owns the UDP socket and the links to all
///  neighbors, dispatching received frames to their links and delivered payloads to the
///  [MessageDispatcher].
///
/// Links are registered explicitly with their neighbor's authenticated node id. Frames from
///  addresses without a registered link are dropped.
pub struct UdpEndPoint {
    socket: Arc<UdpSocket>,
    config: Arc<OverlayConfig>,
    links: RwLock<FxHashMap<SocketAddr, Arc<ReliableLink>>>,
    message_dispatcher: Arc<dyn MessageDispatcher>,
    shutdown: broadcast::Sender<()>,
}

impl UdpEndPoint {
    pub async fn new(config: Arc<OverlayConfig>, message_dispatcher: Arc<dyn MessageDispatcher>) -> anyhow::Result<UdpEndPoint> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        info!("bound socket to {:?}", socket.local_addr()?);

        let (shutdown, _) = broadcast::channel(1);
        Ok(UdpEndPoint {
            socket,
            config,
            links: Default::default(),
            message_dispatcher,
            shutdown,
        })
    }

    pub fn self_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Registers a link to a neighbor, replacing (and closing) a previous link to the same
    ///  address
    pub async fn add_link(&self, neighbor: NodeId, peer_addr: SocketAddr) -> Arc<ReliableLink> {
        let link = Arc::new(ReliableLink::new(neighbor, peer_addr, self.socket.clone(), &self.config));
        info!("adding link {:?}", link);

        let prev = self.links.write().await
            .insert(peer_addr, link.clone());
        if let Some(prev) = prev {
            debug!("replacing link {:?}", prev);
            prev.close().await;
        }
        link
    }

    pub async fn remove_link(&self, peer_addr: SocketAddr) -> Option<Arc<ReliableLink>> {
        let removed = self.links.write().await
            .remove(&peer_addr);
        if let Some(link) = &removed {
            info!("removing link {:?}", link);
            link.close().await;
        }
        removed
    }

    pub async fn get_link(&self, peer_addr: SocketAddr) -> Option<Arc<ReliableLink>> {
        self.links.read().await
            .get(&peer_addr)
            .cloned()
    }

    pub async fn links(&self) -> Vec<Arc<ReliableLink>> {
        self.links.read().await
            .values()
            .cloned()
            .collect()
    }

    /// Terminates the receive loop and fails all sends that are waiting for an ack
    pub async fn shutdown(&self) {
        info!("shutting down end point");
        let _ = self.shutdown.send(());
        for link in self.links.write().await.drain().map(|(_, link)| link) {
            link.close().await;
        }
    }

    pub async fn recv_loop(&self) -> anyhow::Result<()> {
        info!("starting receive loop");

        let mut shutdown = self.shutdown.subscribe();
        let mut buf = vec![0u8; self.config.link_mtu.max(u16::MAX as usize)];
        loop {
            let (num_read, from) = tokio::select! {
                _ = shutdown.recv() => {
                    info!("receive loop shut down");
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(x) => x,
                    Err(e) => {
                        error!("socket error: {}", e);
                        continue;
                    }
                },
            };

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "datagram_received", ?correlation_id);
            self.on_datagram(from, Bytes::copy_from_slice(&buf[..num_read]))
                .instrument(span)
                .await;
        }
    }

    async fn on_datagram(&self, from: SocketAddr, mut datagram: Bytes) {
        trace!("received datagram from {:?}: {:?}", from, datagram);

        let link = match self.get_link(from).await {
            Some(link) => link,
            None => {
                debug!("datagram from {:?} without a registered link - dropping", from);
                return;
            }
        };

        let frame = match Frame::deser(&mut datagram) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("received unparsable frame from {:?}, dropping: {}", from, e);
                return;
            }
        };
        if !datagram.is_empty() {
            debug!("{} trailing bytes after frame from {:?} - ignoring them", datagram.len(), from);
        }

        if let Some(payload) = link.on_frame(frame).await {
            // dispatching may send and wait for acks, which requires the receive loop to carry on
            let message_dispatcher = self.message_dispatcher.clone();
            let sender = link.neighbor();
            tokio::spawn(async move {
                message_dispatcher.on_message(sender, payload).await;
            }.in_current_span());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::message_dispatcher::MockMessageDispatcher;
    use crate::test_util::node::{test_bind_addr, test_node_id_from_number};
    use bytes::BytesMut;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn config(n: u16) -> Arc<OverlayConfig> {
        Arc::new(OverlayConfig::new(test_node_id_from_number(n), "overlay", test_bind_addr()))
    }

    fn forwarding_dispatcher(sender: mpsc::UnboundedSender<(NodeId, Bytes)>) -> MockMessageDispatcher {
        let mut dispatcher = MockMessageDispatcher::new();
        dispatcher.expect_on_message()
            .returning(move |from, buf| {
                sender.send((from, buf)).unwrap();
            });
        dispatcher
    }

    #[tokio::test]
    async fn test_send_between_end_points() {
        let (sender_a, _receiver_a) = mpsc::unbounded_channel();
        let (sender_b, mut receiver_b) = mpsc::unbounded_channel();

        let end_point_a = Arc::new(UdpEndPoint::new(config(1), Arc::new(forwarding_dispatcher(sender_a))).await.unwrap());
        let end_point_b = Arc::new(UdpEndPoint::new(config(2), Arc::new(forwarding_dispatcher(sender_b))).await.unwrap());

        let addr_a = end_point_a.self_addr().unwrap();
        let addr_b = end_point_b.self_addr().unwrap();

        let link_a_to_b = end_point_a.add_link(test_node_id_from_number(2), addr_b).await;
        end_point_b.add_link(test_node_id_from_number(1), addr_a).await;

        let a = end_point_a.clone();
        let loop_a = tokio::spawn(async move { a.recv_loop().await });
        let b = end_point_b.clone();
        let loop_b = tokio::spawn(async move { b.recv_loop().await });

        link_a_to_b.send(Bytes::from_static(b"hello")).await.unwrap();

        let (from, payload) = tokio::time::timeout(Duration::from_secs(5), receiver_b.recv()).await.unwrap().unwrap();
        assert_eq!(from, test_node_id_from_number(1));
        assert_eq!(payload, Bytes::from_static(b"hello"));
        assert!(link_a_to_b.ack_timeout().await <= Duration::from_millis(1000));

        end_point_a.shutdown().await;
        end_point_b.shutdown().await;
        loop_a.await.unwrap().unwrap();
        loop_b.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_sender_is_dropped() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let end_point = Arc::new(UdpEndPoint::new(config(1), Arc::new(forwarding_dispatcher(sender))).await.unwrap());
        let addr = end_point.self_addr().unwrap();

        let e = end_point.clone();
        let recv_loop = tokio::spawn(async move { e.recv_loop().await });

        let mut buf = BytesMut::new();
        Frame::Data { sequence: 1, payload: Bytes::from_static(b"x") }.ser(&mut buf).unwrap();
        let stranger = UdpSocket::bind(test_bind_addr()).await.unwrap();
        stranger.send_to(&buf, addr).await.unwrap();

        // no ack for the stranger, and nothing delivered
        let mut ack_buf = [0u8; 100];
        assert!(tokio::time::timeout(Duration::from_millis(200), stranger.recv_from(&mut ack_buf)).await.is_err());
        assert!(receiver.try_recv().is_err());

        end_point.shutdown().await;
        recv_loop.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_add_and_remove_link() {
        let (sender, _receiver) = mpsc::unbounded_channel();
        let end_point = UdpEndPoint::new(config(1), Arc::new(forwarding_dispatcher(sender))).await.unwrap();
        let peer_addr = SocketAddr::from(([127, 0, 0, 1], 4000));

        end_point.add_link(test_node_id_from_number(2), peer_addr).await;
        assert_eq!(end_point.get_link(peer_addr).await.unwrap().neighbor(), test_node_id_from_number(2));

        end_point.add_link(test_node_id_from_number(3), peer_addr).await;
        assert_eq!(end_point.links().await.len(), 1);
        assert_eq!(end_point.get_link(peer_addr).await.unwrap().neighbor(), test_node_id_from_number(3));

        assert!(end_point.remove_link(peer_addr).await.is_some());
        assert!(end_point.get_link(peer_addr).await.is_none());
        assert!(end_point.remove_link(peer_addr).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let mut config = OverlayConfig::new(test_node_id_from_number(1), "overlay", test_bind_addr());
        config.receive_history_len = 0;
        let dispatcher = MockMessageDispatcher::new();
        assert!(UdpEndPoint::new(Arc::new(config), Arc::new(dispatcher)).await.is_err());
    }
}
