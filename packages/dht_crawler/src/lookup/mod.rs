//! Iterative Kademlia lookups. Each lookup runs to completion inside a
//! single `async fn` — no lookup state is ever touched from more than
//! one task — rather than chaining callbacks across the transaction
//! manager, routing table and verifier.

pub mod node_lookup;
pub mod peer_lookup;

use krpc_encoding::NodeID;
use routing_table::Node;
use std::collections::HashSet;

/// Bookkeeping shared by node and peer lookups: the frontier of
/// candidates sorted by distance to `target`, and which of them have
/// been queried, have responded, or are currently in flight.
pub(crate) struct LookupBookkeeping {
    pub target: NodeID,
    pub candidates: Vec<Node>,
    pub queried: HashSet<NodeID>,
    pub responded: HashSet<NodeID>,
}

impl LookupBookkeeping {
    pub fn new(target: NodeID, seed: Vec<Node>) -> LookupBookkeeping {
        let mut bookkeeping = LookupBookkeeping {
            target,
            candidates: Vec::new(),
            queried: HashSet::new(),
            responded: HashSet::new(),
        };
        for node in seed {
            bookkeeping.merge_candidate(node);
        }
        bookkeeping
    }

    pub fn merge_candidate(&mut self, node: Node) {
        if self.candidates.iter().any(|n| n.id == node.id) {
            return;
        }
        self.candidates.push(node);
        self.sort();
    }

    fn sort(&mut self) {
        let target = self.target;
        self.candidates
            .sort_by(|a, b| target.distance(&a.id).cmp(&target.distance(&b.id)));
    }

    /// Up to `count` candidates that have not yet been queried,
    /// closest first.
    pub fn next_to_query(&self, count: usize) -> Vec<Node> {
        self.candidates
            .iter()
            .filter(|n| !self.queried.contains(&n.id))
            .take(count)
            .cloned()
            .collect()
    }

    /// Whether the `k` closest candidates seen so far have each either
    /// responded or been queried (and thus failed/timed out, since a
    /// response would have marked them responded too).
    pub fn converged(&self, k: usize) -> bool {
        self.candidates
            .iter()
            .take(k)
            .all(|n| self.queried.contains(&n.id))
    }

    pub fn closest_responded(&self, n: usize) -> Vec<Node> {
        self.candidates
            .iter()
            .filter(|node| self.responded.contains(&node.id))
            .take(n)
            .cloned()
            .collect()
    }
}
