use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::message::routable_id::{NodeId, RoutableId};
use crate::routing::connection::Connection;
use crate::routing::routing_table::RoutingTable;

/// A [RoutingTable] with a fixed set of neighbors and routes. Messages to a neighbor's node id
///  go to that neighbor directly, all other destinations need an explicit route.
#[derive(Default)]
pub struct StaticRoutingTable {
    neighbors: FxHashMap<NodeId, Arc<dyn Connection>>,
    routes: BTreeMap<RoutableId, Vec<NodeId>>,
}

impl StaticRoutingTable {
    pub fn with_neighbor(mut self, connection: Arc<dyn Connection>) -> StaticRoutingTable {
        self.neighbors.insert(connection.neighbor(), connection);
        self
    }

    /// routes messages for `destination` to the given neighbors, which must be registered
    pub fn with_route(mut self, destination: impl Into<RoutableId>, next_hops: Vec<NodeId>) -> StaticRoutingTable {
        self.routes.insert(destination.into(), next_hops);
        self
    }
}

impl RoutingTable for StaticRoutingTable {
    fn next_hops(&self, destination: &RoutableId) -> Vec<Arc<dyn Connection>> {
        if let Some(connection) = destination.as_node_id().and_then(|n| self.neighbors.get(n)) {
            return vec![connection.clone()];
        }

        self.routes.get(destination)
            .map(|next_hops| next_hops.iter()
                .filter_map(|n| self.neighbors.get(n))
                .cloned()
                .collect())
            .unwrap_or_default()
    }

    fn neighbors(&self) -> Vec<NodeId> {
        let mut result = self.neighbors.keys()
            .cloned()
            .collect::<Vec<_>>();
        result.sort();
        result
    }
}
