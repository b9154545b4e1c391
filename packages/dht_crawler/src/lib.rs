//! Mainline BitTorrent DHT node: routing table maintenance, iterative
//! node/peer lookups, announce, and a background crawler that walks the
//! keyspace discovering nodes and info-hashes. Built on `tokio_krpc`'s
//! wire layer and `routing_table`'s k-buckets; nothing here talks to a
//! socket directly.

pub mod bootstrap;
pub mod bt_port;
pub mod config;
pub mod crawler;
pub mod errors;
pub mod events;
mod lookup;
pub mod node;
pub mod peer_store;
pub mod query_handler;
pub mod refresher;
mod verifier;

pub use errors::{Error, ErrorKind, Result};
pub use lookup::peer_lookup::{AnnounceResult, PeerLookupResult};

use std::sync::{Arc, Mutex};

/// A routing table shared between the query handler, the lookup state
/// machines and the refresher. Never held across an `.await` point —
/// every access is a short lock-mutate-unlock.
pub type SharedRoutingTable = Arc<Mutex<routing_table::RoutingTable>>;
