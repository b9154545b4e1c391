use crate::node::Node;
use chrono::{DateTime, Utc};
use krpc_encoding::NodeID;

/// Highest possible differing-bit position; one bucket per bit of a
/// 160-bit identifier.
pub const MAX_DEPTH: usize = krpc_encoding::ID_LEN * 8;

/// An ordered (oldest-first) list of up to `k` nodes covering one
/// slice of the 160-bit key space.
///
/// Buckets are indexed by the position of the highest-order bit at
/// which a covered node's id differs from the routing table's own id
/// (BEP-5 §"Routing Table"). Every bucket but the last covers exactly
/// one such bit position; the last bucket is a catch-all covering
/// every more-distant position and is the only one eligible to split,
/// since it is the only one that can contain the owning id's subtree.
pub struct Bucket {
    depth: usize,
    k: usize,
    nodes: Vec<Node>,
    last_changed: DateTime<Utc>,
}

/// Outcome of attempting to add a node directly to one bucket, prior
/// to any splitting decision made by the routing table.
pub enum BucketAdd {
    Inserted,
    /// Already present; refreshed in place.
    Refreshed,
    /// No free slot and nothing evictable without a probe. Caller
    /// should ping `candidate`; on success keep it (refresh), on
    /// failure evict it and retry the insert.
    Full { candidate: Node },
    /// No free slot and every node in the bucket is good: the new node
    /// is dropped silently, nothing to ping.
    Dropped,
}

impl Bucket {
    pub fn new(depth: usize, k: usize) -> Bucket {
        Bucket {
            depth,
            k,
            nodes: Vec::with_capacity(k),
            last_changed: Utc::now(),
        }
    }

    pub fn initial(k: usize) -> Bucket {
        Bucket::new(0, k)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.k
    }

    pub fn last_changed(&self) -> DateTime<Utc> {
        self.last_changed
    }

    /// Whether this is the catch-all bucket, eligible to split further.
    pub fn is_last(&self, table_len: usize) -> bool {
        self.depth + 1 == table_len
    }

    pub fn can_split(&self) -> bool {
        self.depth + 1 < MAX_DEPTH
    }

    /// Whether `id` belongs in this bucket, given it is bucket index
    /// `index` of `table_len` total buckets.
    pub fn covers(&self, own: &NodeID, id: &NodeID, table_len: usize) -> bool {
        match own.differing_bit(id) {
            None => false,
            Some(bit) => {
                if self.is_last(table_len) {
                    bit >= self.depth
                } else {
                    bit == self.depth
                }
            }
        }
    }

    pub fn get(&self, id: &NodeID) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn contains(&self, id: &NodeID) -> bool {
        self.get(id).is_some()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn good_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_good())
    }

    pub fn oldest_bad(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.is_bad())
    }

    pub fn oldest_questionable(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.is_questionable())
    }

    pub fn touch(&mut self) {
        self.last_changed = Utc::now();
    }

    /// Attempt to insert or refresh `node`, without splitting.
    pub fn add(&mut self, node: Node) -> BucketAdd {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.id == node.id) {
            *existing = node;
            self.touch();
            return BucketAdd::Refreshed;
        }

        if !self.is_full() {
            self.nodes.push(node);
            self.touch();
            return BucketAdd::Inserted;
        }

        if let Some(pos) = self.nodes.iter().position(|n| n.is_bad()) {
            self.nodes[pos] = node;
            self.touch();
            return BucketAdd::Inserted;
        }

        match self.nodes.iter().find(|n| n.is_questionable()).cloned() {
            Some(candidate) => BucketAdd::Full { candidate },
            None => BucketAdd::Dropped,
        }
    }

    pub fn remove(&mut self, id: &NodeID) -> Option<Node> {
        let pos = self.nodes.iter().position(|n| &n.id == id)?;
        self.touch();
        Some(self.nodes.remove(pos))
    }

    /// Replace `candidate` with `pending` (used after a failed
    /// liveness probe of the bucket's oldest questionable node).
    pub fn replace(&mut self, candidate_id: &NodeID, pending: Node) {
        if let Some(pos) = self.nodes.iter().position(|n| &n.id == candidate_id) {
            self.nodes[pos] = pending;
        } else if !self.is_full() {
            self.nodes.push(pending);
        }
        self.touch();
    }

    /// Split this catch-all bucket in two against owning id `own`:
    /// `self` keeps the deeper (catch-all) half, the returned bucket
    /// takes the shallower half at the old depth.
    pub fn split(&mut self, own: &NodeID) -> Bucket {
        let old_depth = self.depth;
        self.depth += 1;

        let mut shallow = Bucket::new(old_depth, self.k);
        let drained: Vec<Node> = self.nodes.drain(..).collect();

        for node in drained {
            match own.differing_bit(&node.id) {
                Some(bit) if bit == old_depth => shallow.nodes.push(node),
                _ => self.nodes.push(node),
            }
        }

        shallow.touch();
        self.touch();
        shallow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krpc_encoding::Addr;
    use std::net::Ipv4Addr;

    fn node() -> Node {
        Node::new(NodeID::random(), Addr::new(Ipv4Addr::new(127, 0, 0, 1), 6881))
    }

    #[test]
    fn fills_up_to_k() {
        let mut bucket = Bucket::initial(4);
        for _ in 0..4 {
            assert!(matches!(bucket.add(node()), BucketAdd::Inserted));
        }
        assert!(bucket.is_full());
    }

    #[test]
    fn duplicate_id_refreshes() {
        let mut bucket = Bucket::initial(4);
        let n = node();
        bucket.add(n.clone());
        assert!(matches!(bucket.add(n.clone()), BucketAdd::Refreshed));
        assert_eq!(bucket.len(), 1);
    }
}
