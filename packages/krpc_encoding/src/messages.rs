use crate::addr::Addr;
use crate::booleans;
use crate::errors::{Error, ErrorKind, Result};
use crate::node_id::NodeID;
use crate::node_info::{self, NodeInfo};
use serde_bytes::ByteBuf;
use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted datagram size. Oversize messages are rejected
/// before bencode decoding is even attempted.
pub const MAX_MESSAGE_LEN: usize = 1400;

/// Envelope holding information common to queries, responses and
/// errors.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Observed endpoint of the remote peer. Only sent by nodes
    /// supporting BEP-42; the core never validates it, only emits it
    /// when answering queries.
    pub ip: Option<Addr>,

    /// Transaction id generated by the querying node and echoed back.
    #[serde(rename = "t", with = "serde_bytes")]
    pub transaction_id: Vec<u8>,

    /// Client version string.
    #[serde(rename = "v")]
    pub version: Option<ByteBuf>,

    #[serde(flatten)]
    pub message_type: MessageType,

    /// Sent by read-only DHT nodes (BEP-43); the core does not
    /// implement read-only mode itself but must not choke on peers
    /// that do.
    #[serde(
        rename = "ro",
        default,
        skip_serializing_if = "booleans::is_false",
        deserialize_with = "booleans::deserialize"
    )]
    pub read_only: bool,
}

impl Envelope {
    pub fn decode(bytes: &[u8]) -> Result<Envelope> {
        if bytes.len() > MAX_MESSAGE_LEN {
            return Err(Error::from(ErrorKind::MessageTooLarge {
                limit: MAX_MESSAGE_LEN,
            }));
        }
        serde_bencode::de::from_bytes(bytes).map_err(|cause| Error::from(ErrorKind::DecodeError { cause }))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_bencode::ser::to_bytes(self).map_err(|cause| Error::from(ErrorKind::EncodeError { cause }))
    }

    pub fn query(transaction_id: Vec<u8>, query: Query) -> Envelope {
        Envelope {
            ip: None,
            transaction_id,
            version: None,
            message_type: MessageType::Query { query },
            read_only: false,
        }
    }

    pub fn response(transaction_id: Vec<u8>, response: Response, observed: Option<Addr>) -> Envelope {
        Envelope {
            ip: observed,
            transaction_id,
            version: None,
            message_type: MessageType::Response { response },
            read_only: false,
        }
    }

    pub fn error(transaction_id: Vec<u8>, error: KRPCError) -> Envelope {
        Envelope {
            ip: None,
            transaction_id,
            version: None,
            message_type: MessageType::Error { error },
            read_only: false,
        }
    }

    /// The sender's claimed node id, when this message carries one.
    /// Responses and errors don't necessarily carry an id the dispatcher
    /// can trust (errors never do); queries always must.
    pub fn sender_id(&self) -> Option<NodeID> {
        match &self.message_type {
            MessageType::Query { query } => Some(query.id()),
            MessageType::Response {
                response: Response::NextHop { id, .. },
            }
            | MessageType::Response {
                response: Response::GetPeers { id, .. },
            }
            | MessageType::Response {
                response: Response::OnlyID { id },
            } => Some(*id),
            MessageType::Error { .. } => None,
        }
    }
}

/// Tagged body of a KRPC message: `y` selects between query, response
/// and error.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "y")]
pub enum MessageType {
    #[serde(rename = "q")]
    Query {
        #[serde(flatten)]
        query: Query,
    },

    #[serde(rename = "r")]
    Response {
        #[serde(rename = "r")]
        response: Response,
    },

    #[serde(rename = "e")]
    Error {
        #[serde(rename = "e")]
        error: KRPCError,
    },
}

/// Error sent when a query cannot be fulfilled: `[code, message]`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct KRPCError(pub u16, pub String);

impl KRPCError {
    pub const GENERIC: u16 = 201;
    pub const SERVER: u16 = 202;
    pub const PROTOCOL: u16 = 203;
    pub const METHOD_UNKNOWN: u16 = 204;

    pub fn new(code: u16, message: impl Into<String>) -> KRPCError {
        KRPCError(code, message.into())
    }

    pub fn code(&self) -> u16 {
        self.0
    }

    pub fn message(&self) -> &str {
        &self.1
    }
}

impl fmt::Display for KRPCError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KRPC error {}: {}", self.0, self.1)
    }
}

/// The four BEP-5 queries the core both services and issues.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "q", content = "a")]
pub enum Query {
    #[serde(rename = "ping")]
    Ping { id: NodeID },

    #[serde(rename = "find_node")]
    FindNode { id: NodeID, target: NodeID },

    #[serde(rename = "get_peers")]
    GetPeers { id: NodeID, info_hash: NodeID },

    #[serde(rename = "announce_peer")]
    AnnouncePeer {
        id: NodeID,

        /// If `true`, ignore `port` and use the UDP source port instead.
        #[serde(
            default,
            skip_serializing_if = "booleans::is_false",
            deserialize_with = "booleans::deserialize"
        )]
        implied_port: bool,

        port: Option<u16>,
        info_hash: NodeID,

        #[serde(with = "serde_bytes")]
        token: Vec<u8>,
    },
}

impl Query {
    pub fn id(&self) -> NodeID {
        match self {
            Query::Ping { id }
            | Query::FindNode { id, .. }
            | Query::GetPeers { id, .. }
            | Query::AnnouncePeer { id, .. } => *id,
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            Query::Ping { .. } => "ping",
            Query::FindNode { .. } => "find_node",
            Query::GetPeers { .. } => "get_peers",
            Query::AnnouncePeer { .. } => "announce_peer",
        }
    }
}

/// Response bodies. Untagged: the variant is inferred from which
/// fields are present, matching the query that produced it.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum Response {
    /// Reply to `find_node`, and to `get_peers`/`announce_peer` when no
    /// direct answer is available.
    NextHop {
        id: NodeID,

        /// Present (possibly empty) only on replies to `get_peers`.
        token: Option<ByteBuf>,

        #[serde(with = "node_info")]
        nodes: Vec<NodeInfo>,
    },

    /// Reply to `get_peers` when the responder holds peers for the
    /// queried info-hash.
    GetPeers {
        id: NodeID,
        token: Option<ByteBuf>,

        #[serde(rename = "values")]
        peers: Vec<Addr>,
    },

    /// Reply to `ping` and `announce_peer`.
    OnlyID { id: NodeID },
}

impl Response {
    pub fn id(&self) -> NodeID {
        match self {
            Response::NextHop { id, .. } => *id,
            Response::GetPeers { id, .. } => *id,
            Response::OnlyID { id } => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_id::NodeID;

    fn sample_id(byte: u8) -> NodeID {
        NodeID::new([byte; crate::node_id::ID_LEN])
    }

    #[test]
    fn ping_round_trip() {
        let msg = Envelope::query(b"aa".to_vec(), Query::Ping { id: sample_id(1) });
        let bytes = msg.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn find_node_response_round_trip() {
        let addr = Addr::new(std::net::Ipv4Addr::new(1, 2, 3, 4), 6881);
        let node = NodeInfo::new(sample_id(2), addr);
        let msg = Envelope::response(
            b"bb".to_vec(),
            Response::NextHop {
                id: sample_id(1),
                token: None,
                nodes: vec![node],
            },
            None,
        );
        let bytes = msg.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn get_peers_values_round_trip() {
        let peer = Addr::new(std::net::Ipv4Addr::new(10, 0, 0, 1), 51413);
        let msg = Envelope::response(
            b"cc".to_vec(),
            Response::GetPeers {
                id: sample_id(3),
                token: Some(ByteBuf::from(b"tok".to_vec())),
                peers: vec![peer],
            },
            None,
        );
        let bytes = msg.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn announce_peer_implied_port_round_trip() {
        let query = Query::AnnouncePeer {
            id: sample_id(4),
            implied_port: true,
            port: None,
            info_hash: sample_id(5),
            token: b"tok".to_vec(),
        };
        let msg = Envelope::query(b"dd".to_vec(), query);
        let bytes = msg.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn error_round_trip() {
        let msg = Envelope::error(b"ee".to_vec(), KRPCError::new(KRPCError::PROTOCOL, "invalid token"));
        let bytes = msg.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn oversize_message_rejected() {
        let huge = vec![b'0'; MAX_MESSAGE_LEN + 1];
        assert!(Envelope::decode(&huge).is_err());
    }

    #[test]
    fn compact_node_info_is_26_bytes() {
        let addr = Addr::new(std::net::Ipv4Addr::new(127, 0, 0, 1), 6881);
        let node = NodeInfo::new(sample_id(9), addr);
        assert_eq!(node.to_bytes().len(), crate::node_info::NODE_INFO_LEN);
        assert_eq!(NodeInfo::from_bytes(&node.to_bytes()).unwrap(), node);
    }
}
