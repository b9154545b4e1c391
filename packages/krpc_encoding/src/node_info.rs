//! `serde(with = "node_info")` helper for the compact 26-byte
//! node-list encoding used by `find_node`/`get_peers` responses.

use crate::addr::{Addr, ADDR_LEN};
use crate::errors::{Error, ErrorKind};
use crate::node_id::{NodeID, ID_LEN};
use serde::de::{self, Deserializer, Visitor};
use serde::ser::{Serialize, Serializer};
use std::fmt;

pub const NODE_INFO_LEN: usize = ID_LEN + ADDR_LEN;

/// A node's identifier plus the endpoint it was last seen at, as
/// carried in the compact `nodes` field of a KRPC response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeID,
    pub addr: Addr,
}

impl NodeInfo {
    pub fn new(id: NodeID, addr: Addr) -> NodeInfo {
        NodeInfo { id, addr }
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::errors::Result<NodeInfo> {
        if bytes.len() != NODE_INFO_LEN {
            return Err(Error::from(ErrorKind::WrongLength {
                what: "compact node info",
                expected: NODE_INFO_LEN,
                got: bytes.len(),
            }));
        }
        let mut id_bytes = [0u8; ID_LEN];
        id_bytes.copy_from_slice(&bytes[..ID_LEN]);
        let addr = Addr::from_bytes(&bytes[ID_LEN..])?;
        Ok(NodeInfo::new(NodeID::new(id_bytes), addr))
    }

    pub fn to_bytes(&self) -> [u8; NODE_INFO_LEN] {
        let mut out = [0u8; NODE_INFO_LEN];
        out[..ID_LEN].copy_from_slice(self.id.as_bytes());
        out[ID_LEN..].copy_from_slice(&self.addr.to_bytes());
        out
    }
}

pub fn serialize<S: Serializer>(nodes: &[NodeInfo], serializer: S) -> Result<S::Ok, S::Error> {
    let mut bytes = Vec::with_capacity(nodes.len() * NODE_INFO_LEN);
    for node in nodes {
        bytes.extend_from_slice(&node.to_bytes());
    }
    serde_bytes::Bytes::new(&bytes).serialize(serializer)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<NodeInfo>, D::Error> {
    struct NodeListVisitor;

    impl<'de> Visitor<'de> for NodeListVisitor {
        type Value = Vec<NodeInfo>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "a byte string whose length is a multiple of {}", NODE_INFO_LEN)
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Vec<NodeInfo>, E> {
            if v.len() % NODE_INFO_LEN != 0 {
                return Err(de::Error::invalid_length(v.len(), &self));
            }
            v.chunks(NODE_INFO_LEN)
                .map(|chunk| {
                    NodeInfo::from_bytes(chunk).map_err(|_| de::Error::invalid_length(chunk.len(), &self))
                })
                .collect()
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Vec<NodeInfo>, E> {
            self.visit_bytes(&v)
        }
    }

    deserializer.deserialize_bytes(NodeListVisitor)
}
