use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::LinkError;
use crate::message::routable_id::NodeId;
use crate::routing::connection::Connection;

/// A [Connection] that records everything sent through it. It can be configured to fail sends,
///  and to take some time for each send.
#[derive(Debug)]
pub struct TrackingMockConnection {
    neighbor: NodeId,
    mtu: usize,
    delay: Option<Duration>,
    failure: Option<LinkError>,
    tracker: Arc<RwLock<Vec<Bytes>>>,
}

impl TrackingMockConnection {
    pub const DEFAULT_MTU: usize = 1464;

    pub fn new(neighbor: NodeId) -> TrackingMockConnection {
        TrackingMockConnection {
            neighbor,
            mtu: Self::DEFAULT_MTU,
            delay: None,
            failure: None,
            tracker: Default::default(),
        }
    }

    /// a connection that records sent messages, but fails every send with `failure`
    pub fn failing(neighbor: NodeId, failure: LinkError) -> TrackingMockConnection {
        TrackingMockConnection {
            failure: Some(failure),
            ..Self::new(neighbor)
        }
    }

    pub fn with_mtu(self, mtu: usize) -> TrackingMockConnection {
        TrackingMockConnection { mtu, ..self }
    }

    pub fn with_delay(self, delay: Duration) -> TrackingMockConnection {
        TrackingMockConnection { delay: Some(delay), ..self }
    }

    pub async fn sent_messages(&self) -> Vec<Bytes> {
        self.tracker.read().await
            .clone()
    }

    pub async fn assert_no_remaining_messages(&self) {
        assert!(
            self.tracker.read().await
                .is_empty()
        );
    }
}

#[async_trait]
impl Connection for TrackingMockConnection {
    fn neighbor(&self) -> NodeId {
        self.neighbor.clone()
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    async fn send(&self, message: Bytes) -> Result<(), LinkError> {
        self.tracker.write().await.push(message);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}
