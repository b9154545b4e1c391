use chrono::{DateTime, Duration, Utc};
use krpc_encoding::{Addr, NodeID, NodeInfo};

/// A node is considered good if it answered a query inside this
/// window and has not since failed.
pub const GOOD_WINDOW_MINUTES: i64 = 15;

/// Two consecutive failures without an intervening success make a
/// node bad and evictable.
pub const FAILURES_UNTIL_BAD: u32 = 2;

/// A single entry in a [`crate::bucket::Bucket`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: NodeID,
    pub endpoint: Addr,
    last_seen: DateTime<Utc>,
    failed_queries: u32,
}

impl Node {
    pub fn new(id: NodeID, endpoint: Addr) -> Node {
        Node {
            id,
            endpoint,
            last_seen: Utc::now(),
            failed_queries: 0,
        }
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn failed_queries(&self) -> u32 {
        self.failed_queries
    }

    /// Record a query from, or response by, this node.
    pub fn mark_seen(&mut self) {
        self.last_seen = Utc::now();
        self.failed_queries = 0;
    }

    /// Record a failed (timed-out or errored) query to this node.
    pub fn mark_failed(&mut self) {
        self.failed_queries += 1;
    }

    pub fn is_good(&self) -> bool {
        self.failed_queries == 0 && Utc::now() - self.last_seen < Duration::minutes(GOOD_WINDOW_MINUTES)
    }

    pub fn is_questionable(&self) -> bool {
        !self.is_good() && !self.is_bad()
    }

    pub fn is_bad(&self) -> bool {
        self.failed_queries >= FAILURES_UNTIL_BAD
    }
}

impl From<&Node> for NodeInfo {
    fn from(node: &Node) -> NodeInfo {
        NodeInfo::new(node.id, node.endpoint)
    }
}

impl From<Node> for NodeInfo {
    fn from(node: Node) -> NodeInfo {
        NodeInfo::new(node.id, node.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample_node() -> Node {
        Node::new(NodeID::random(), Addr::new(Ipv4Addr::new(127, 0, 0, 1), 6881))
    }

    #[test]
    fn fresh_node_is_good() {
        assert!(sample_node().is_good());
    }

    #[test]
    fn one_failure_is_questionable() {
        let mut node = sample_node();
        node.mark_failed();
        assert!(node.is_questionable());
        assert!(!node.is_good());
        assert!(!node.is_bad());
    }

    #[test]
    fn two_failures_is_bad() {
        let mut node = sample_node();
        node.mark_failed();
        node.mark_failed();
        assert!(node.is_bad());
    }

    #[test]
    fn success_clears_failures() {
        let mut node = sample_node();
        node.mark_failed();
        node.mark_seen();
        assert!(node.is_good());
        assert_eq!(node.failed_queries(), 0);
    }
}
