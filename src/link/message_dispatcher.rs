use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;

use crate::message::routable_id::NodeId;


/// Receives the payloads of data frames, i.e. encoded messages or message fragments
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageDispatcher: Send + Sync + 'static {
    async fn on_message(&self, sender: NodeId, msg_buf: Bytes);
}
