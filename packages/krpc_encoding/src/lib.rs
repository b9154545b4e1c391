//! Bencoded KRPC wire format (BEP-5): typed messages, compact node and
//! peer encodings, and the 160-bit identifier shared by node ids and
//! info-hashes. No networking lives here.

mod addr;
mod booleans;
pub mod errors;
mod messages;
mod node_id;
mod node_info;

pub use addr::{Addr, ADDR_LEN};
pub use errors::{Error, ErrorKind, Result};
pub use messages::{Envelope, KRPCError, MessageType, Query, Response, MAX_MESSAGE_LEN};
pub use node_id::{Distance, InfoHash, NodeID, ID_LEN};
pub use node_info::{NodeInfo, NODE_INFO_LEN};
