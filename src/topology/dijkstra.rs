use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::topology::graph::Topology;
use crate::transport::node_id::NodeId;

/// Pluggable shortest-path computation: given the graph and a starting node, produce the
///  first hop on a shortest path to every reachable destination. The transport core only
///  ever needs first hops, not full paths.
#[mockall::automock]
pub trait PathFinder {
    fn first_hops(&self, from: NodeId, graph: &Topology) -> FxHashMap<NodeId, NodeId>;
}


/// Textbook Dijkstra over the adjacency map. Where several shortest paths exist, the
///  first one settled wins, with ties broken by node id so the result is deterministic
///  for a given topology.
pub struct Dijkstra;

impl PathFinder for Dijkstra {
    fn first_hops(&self, from: NodeId, graph: &Topology) -> FxHashMap<NodeId, NodeId> {
        let mut best_dist: FxHashMap<NodeId, u64> = FxHashMap::default();
        let mut settled: FxHashSet<NodeId> = FxHashSet::default();
        let mut first_hops: FxHashMap<NodeId, NodeId> = FxHashMap::default();

        let mut queue = BinaryHeap::new();
        queue.push(Reverse((0u64, from, None::<NodeId>)));
        best_dist.insert(from, 0);

        while let Some(Reverse((dist, node, first_hop))) = queue.pop() {
            if !settled.insert(node) {
                continue;
            }
            if let Some(hop) = first_hop {
                first_hops.insert(node, hop);
            }

            for (neighbor, weight) in graph.neighbors(&node) {
                if settled.contains(&neighbor) {
                    continue;
                }

                let neighbor_dist = dist + weight as u64;
                if best_dist
                    .get(&neighbor)
                    .map(|&d| neighbor_dist < d)
                    .unwrap_or(true)
                {
                    best_dist.insert(neighbor, neighbor_dist);
                    let hop = first_hop.unwrap_or(neighbor);
                    queue.push(Reverse((neighbor_dist, neighbor, Some(hop))));
                }
            }
        }

        first_hops
    }
}
