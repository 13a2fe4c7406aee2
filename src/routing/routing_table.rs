use std::sync::Arc;

#[cfg(test)] use mockall::automock;

use crate::message::routable_id::{NodeId, RoutableId};
use crate::routing::connection::Connection;

/// The overlay's routing state, maintained by the topology plugin outside this crate
#[cfg_attr(test, automock)]
pub trait RoutingTable: Send + Sync + 'static {
    /// The connections a message to `destination` should be sent to. There can be several
    ///  valid next hops, and the router sends to all of them.
    fn next_hops(&self, destination: &RoutableId) -> Vec<Arc<dyn Connection>>;

    /// the node ids of all directly connected neighbors
    fn neighbors(&self) -> Vec<NodeId>;
}

/// The overlay algorithm's notion of distance between ids
#[cfg_attr(test, automock)]
pub trait TopologyPlugin: Send + Sync + 'static {
    /// the candidate that is closest to `target`, or `None` if there are no candidates
    fn closer_id(&self, target: &RoutableId, candidates: &[NodeId]) -> Option<NodeId>;
}
