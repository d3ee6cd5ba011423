use rustc_hash::FxHashMap;

use crate::topology::dijkstra::{Dijkstra, PathFinder};
use crate::topology::graph::Topology;
use crate::transport::node_id::NodeId;

/// The current next-hop assignment: for every reachable destination, the directly
///  connected peer that traffic for it should be handed to. Rebuilt wholesale whenever
///  the topology changes; only one next hop is kept per destination even when several
///  shortest paths exist.
pub struct Router {
    path_finder: Box<dyn PathFinder>,
    next_hops: FxHashMap<NodeId, NodeId>,
}

impl Router {
    pub fn new() -> Router {
        Router::with_path_finder(Box::new(Dijkstra))
    }

    pub fn with_path_finder(path_finder: Box<dyn PathFinder>) -> Router {
        Router {
            path_finder,
            next_hops: FxHashMap::default(),
        }
    }

    pub fn rebuild(&mut self, from: NodeId, graph: &Topology) {
        self.next_hops = self.path_finder.first_hops(from, graph);
    }

    pub fn next_hop(&self, dest: &NodeId) -> Option<NodeId> {
        self.next_hops.get(dest).copied()
    }

    pub fn is_routable(&self, dest: &NodeId) -> bool {
        self.next_hops.contains_key(dest)
    }

    pub fn routed_destinations(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.next_hops.keys().copied()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
