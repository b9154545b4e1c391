//! Kademlia routing table: k-buckets of [`Node`]s keyed by XOR
//! distance to an owning id, split along the path to that id as
//! buckets fill (BEP-5).

mod bucket;
mod node;
mod table;

pub use bucket::{BucketAdd, MAX_DEPTH};
pub use node::{Node, FAILURES_UNTIL_BAD, GOOD_WINDOW_MINUTES};
pub use table::{AddOutcome, BucketInfo, RoutingTable, DEFAULT_K};
