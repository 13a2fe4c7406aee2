use std::net::SocketAddr;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tracing::error;

/// The mechanics of putting an encoded frame on the wire
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameSink: Send + Sync + 'static {
    async fn send_frame(&self, to: SocketAddr, frame_buf: &[u8]) -> anyhow::Result<()>;
}

#[async_trait]
impl FrameSink for UdpSocket {
    async fn send_frame(&self, to: SocketAddr, frame_buf: &[u8]) -> anyhow::Result<()> {
        if let Err(e) = self.send_to(frame_buf, to).await {
            error!("error sending UDP packet to {:?}: {}", to, e);
            return Err(e.into());
        }
        Ok(())
    }
}
