use std::collections::BTreeMap;

use crate::transport::node_id::NodeId;

/// The global mesh topology as currently known to this node: an undirected graph of
///  nodes with weighted links (weight 1 unless the link layer reports otherwise). This
///  is pure data; shortest-path computation lives behind
///  [PathFinder](crate::topology::dijkstra::PathFinder).
#[derive(Clone, Debug, Default)]
pub struct Topology {
    adjacency: BTreeMap<NodeId, BTreeMap<NodeId, u32>>,
}

impl Topology {
    pub fn new() -> Topology {
        Topology {
            adjacency: BTreeMap::default(),
        }
    }

    pub fn add_node(&mut self, node: NodeId) {
        self.adjacency.entry(node).or_default();
    }

    pub fn add_edge(&mut self, a: NodeId, b: NodeId) {
        self.add_edge_weighted(a, b, 1);
    }

    pub fn add_edge_weighted(&mut self, a: NodeId, b: NodeId, weight: u32) {
        self.adjacency.entry(a).or_default().insert(b, weight);
        self.adjacency.entry(b).or_default().insert(a, weight);
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.adjacency.contains_key(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency.keys().copied()
    }

    pub fn neighbors(&self, node: &NodeId) -> impl Iterator<Item = (NodeId, u32)> + '_ {
        self.adjacency
            .get(node)
            .into_iter()
            .flat_map(|neighbors| neighbors.iter().map(|(&n, &w)| (n, w)))
    }
}
