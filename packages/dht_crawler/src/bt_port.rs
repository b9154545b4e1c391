//! The BitTorrent peer wire protocol's `PORT` message (BEP-5 §"Routing
//! Table" interop note): a 5-byte length-prefixed message announcing
//! the DHT port of a peer met over the regular TCP wire. Everything
//! else about that protocol is out of scope; the core only
//! decodes/encodes this one message so a BT peer connection handler
//! (external collaborator) can feed discovered DHT ports into
//! [`crate::node::DhtNode::learn_bt_port`].

const PORT_MESSAGE_ID: u8 = 0x09;
const PORT_MESSAGE_LEN: [u8; 4] = [0x00, 0x00, 0x00, 0x03];

/// Decode a `[00 00 00 03][09][port_hi][port_lo]` message. Returns
/// `None` for anything else — this is not a general BT message parser.
pub fn decode_port_message(bytes: &[u8]) -> Option<u16> {
    if bytes.len() != 7 || bytes[0..4] != PORT_MESSAGE_LEN || bytes[4] != PORT_MESSAGE_ID {
        return None;
    }
    Some(u16::from_be_bytes([bytes[5], bytes[6]]))
}

/// Encode the DHT port this node is listening on for emission over a
/// BT peer connection.
pub fn encode_port_message(port: u16) -> [u8; 7] {
    let port_bytes = port.to_be_bytes();
    [
        PORT_MESSAGE_LEN[0],
        PORT_MESSAGE_LEN[1],
        PORT_MESSAGE_LEN[2],
        PORT_MESSAGE_LEN[3],
        PORT_MESSAGE_ID,
        port_bytes[0],
        port_bytes[1],
    ]
}
