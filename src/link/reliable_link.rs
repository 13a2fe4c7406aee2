use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, trace, warn};

use crate::config::OverlayConfig;
use crate::error::LinkError;
use crate::link::frame::Frame;
use crate::link::frame_sink::FrameSink;
use crate::link::link_state::LinkState;
use crate::message::routable_id::NodeId;
use crate::routing::connection::Connection;

/// A neighbor link over an unreliable datagram transport. Every data frame is acknowledged by
///  the receiver, and a send completes successfully once its ack arrives. Frames that are not
///  acknowledged within the adaptive timeout fail with [LinkError::UnackedFrame] - there is no
///  automatic retransmission, retries are up to the layers above.
pub struct ReliableLink {
    neighbor: NodeId,
    peer_addr: SocketAddr,
    mtu: usize,
    frame_sink: Arc<dyn FrameSink>,
    state: Mutex<LinkState>,
}

impl Debug for ReliableLink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReliableLink{{neighbor:{:?},peer_addr:{:?}}}", self.neighbor, self.peer_addr)
    }
}

impl ReliableLink {
    pub fn new(neighbor: NodeId, peer_addr: SocketAddr, frame_sink: Arc<dyn FrameSink>, config: &OverlayConfig) -> ReliableLink {
        ReliableLink {
            neighbor,
            peer_addr,
            mtu: config.link_mtu.saturating_sub(Frame::DATA_OVERHEAD),
            frame_sink,
            state: Mutex::new(LinkState::new(config)),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn ack_timeout(&self) -> Duration {
        self.state.lock().await.ack_timeout()
    }

    pub async fn num_in_flight(&self) -> usize {
        self.state.lock().await.num_in_flight()
    }

    /// Sends a payload in a single data frame, completing when the frame is acknowledged
    pub async fn send_payload(&self, payload: Bytes) -> Result<(), LinkError> {
        let (sequence, ack_receiver, ack_timeout) = {
            let mut state = self.state.lock().await;
            let (sequence, ack_receiver) = state.register_send(Instant::now());
            (sequence, ack_receiver, state.ack_timeout())
        };

        let mut buf = BytesMut::with_capacity(payload.len() + Frame::DATA_OVERHEAD);
        if let Err(e) = (Frame::Data { sequence, payload }).ser(&mut buf) {
            self.state.lock().await.on_ack_timeout(sequence);
            return Err(e.into());
        }

        trace!("sending frame {} to {:?}", sequence, self.neighbor);
        if let Err(e) = self.frame_sink.send_frame(self.peer_addr, &buf).await {
            self.state.lock().await.on_ack_timeout(sequence);
            return Err(LinkError::Transport(e.to_string()));
        }

        match timeout(ack_timeout, ack_receiver).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                debug!("link to {:?} closed while frame {} was in flight", self.neighbor, sequence);
                Err(LinkError::Closed)
            }
            Err(_) => {
                if self.state.lock().await.on_ack_timeout(sequence) {
                    warn!("frame {} to {:?} was not acknowledged within {:?}", sequence, self.neighbor, ack_timeout);
                    Err(LinkError::UnackedFrame { sequence })
                }
                else {
                    // the ack arrived while the timeout fired
                    Ok(())
                }
            }
        }
    }

    /// Processes a frame received from this link's peer, returning the payload of new data
    ///  frames for delivery
    pub async fn on_frame(&self, frame: Frame) -> Option<Bytes> {
        match frame {
            Frame::Data { sequence, payload } => {
                let (ack, is_new) = self.state.lock().await.on_data(sequence);
                self.send_ack(ack).await;

                if is_new {
                    Some(payload)
                }
                else {
                    debug!("duplicate frame {} from {:?} - dropping", sequence, self.neighbor);
                    None
                }
            }
            Frame::Ack { ack_sequence, received_mask } => {
                let num_resolved = self.state.lock().await
                    .on_ack(ack_sequence, received_mask, Instant::now());
                trace!("ack {} from {:?} resolved {} frames", ack_sequence, self.neighbor, num_resolved);
                None
            }
        }
    }

    async fn send_ack(&self, ack: Frame) {
        let mut buf = BytesMut::with_capacity(Frame::ACK_LEN);
        if let Err(e) = ack.ser(&mut buf) {
            error!("error serializing ack frame: {}", e);
            return;
        }
        if let Err(e) = self.frame_sink.send_frame(self.peer_addr, &buf).await {
            debug!("error sending ack to {:?}: {}", self.neighbor, e);
        }
    }

    /// Fails all sends that are waiting for an ack
    pub async fn close(&self) {
        self.state.lock().await.close();
    }
}

#[async_trait]
impl Connection for ReliableLink {
    fn neighbor(&self) -> NodeId {
        self.neighbor.clone()
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    async fn send(&self, message: Bytes) -> Result<(), LinkError> {
        self.send_payload(message).await
    }
}
