use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const ID_LEN: usize = 20;

/// 160-bit identifier shared by DHT nodes and torrent info-hashes.
///
/// Equality and ordering are plain byte comparison; the Kademlia
/// metric itself lives on [`Distance`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeID([u8; ID_LEN]);

/// Alias used where a value is conceptually a torrent info-hash rather
/// than a node identifier. Same representation; the 160-bit key space
/// is shared by both per BEP-5.
pub type InfoHash = NodeID;

impl NodeID {
    pub fn new(bytes: [u8; ID_LEN]) -> NodeID {
        NodeID(bytes)
    }

    pub fn zero() -> NodeID {
        NodeID([0u8; ID_LEN])
    }

    pub fn random() -> NodeID {
        let mut bytes = [0u8; ID_LEN];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        NodeID(bytes)
    }

    /// A random id that shares `prefix_bits` leading bits with `self`.
    ///
    /// Used by the bucket refresher to target a lookup inside a
    /// specific bucket's range.
    pub fn random_in_subtree(&self, prefix_bits: usize) -> NodeID {
        let mut bytes = self.0;
        let full_bytes = prefix_bits / 8;
        let remaining_bits = prefix_bits % 8;

        let mut rng = rand::thread_rng();
        if remaining_bits > 0 {
            let mask = 0xFFu8 << (8 - remaining_bits);
            let random_byte: u8 = rand::Rng::gen(&mut rng);
            bytes[full_bytes] = (bytes[full_bytes] & mask) | (random_byte & !mask);
        }
        for byte in bytes.iter_mut().skip(full_bytes + if remaining_bits > 0 { 1 } else { 0 }) {
            *byte = rand::Rng::gen(&mut rng);
        }
        NodeID(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn distance(&self, other: &NodeID) -> Distance {
        let mut out = [0u8; ID_LEN];
        for i in 0..ID_LEN {
            out[i] = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// Index of the highest-order bit at which `self` and `other`
    /// differ, 0-based from the most significant bit. `None` if equal.
    pub fn differing_bit(&self, other: &NodeID) -> Option<usize> {
        self.distance(other).highest_set_bit()
    }

    pub fn hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// SHA-1 of arbitrary bytes, e.g. a torrent's `info` dictionary.
    pub fn from_sha1(data: &[u8]) -> NodeID {
        let mut hasher = sha1::Sha1::new();
        hasher.update(data);
        NodeID(hasher.digest().bytes())
    }
}

impl fmt::Debug for NodeID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeID({})", self.hex())
    }
}

impl fmt::Display for NodeID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

/// XOR distance between two [`NodeID`]s, ordered as a 160-bit unsigned
/// big-endian integer (i.e. plain lexicographic byte comparison).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance([u8; ID_LEN]);

impl Distance {
    pub fn highest_set_bit(&self) -> Option<usize> {
        for (byte_idx, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                let bit_in_byte = byte.leading_zeros() as usize;
                return Some(byte_idx * 8 + bit_in_byte);
            }
        }
        None
    }
}

impl Serialize for NodeID {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde_bytes::Bytes::new(&self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NodeID {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<NodeID, D::Error> {
        struct NodeIDVisitor;

        impl<'de> Visitor<'de> for NodeIDVisitor {
            type Value = NodeID;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a {}-byte node id", ID_LEN)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<NodeID, E> {
                if v.len() != ID_LEN {
                    return Err(de::Error::invalid_length(v.len(), &self));
                }
                let mut bytes = [0u8; ID_LEN];
                bytes.copy_from_slice(v);
                Ok(NodeID(bytes))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<NodeID, E> {
                self.visit_bytes(&v)
            }
        }

        deserializer.deserialize_bytes(NodeIDVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric() {
        let a = NodeID::random();
        let b = NodeID::random();
        assert!(a.distance(&b) == b.distance(&a));
    }

    #[test]
    fn distance_to_self_is_zero() {
        let a = NodeID::random();
        assert!(a.distance(&a).highest_set_bit().is_none());
    }

    #[test]
    fn random_in_subtree_preserves_prefix() {
        let base = NodeID::random();
        for prefix in [0, 1, 7, 8, 9, 15, 16, 159].iter().copied() {
            let generated = base.random_in_subtree(prefix);
            if let Some(bit) = base.differing_bit(&generated) {
                assert!(bit >= prefix, "prefix {} violated at bit {}", prefix, bit);
            }
        }
    }
}
