use crate::errors::{Error, ErrorKind, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

pub const ADDR_LEN: usize = 6;

/// An IPv4 endpoint, compact-encoded on the wire as 4 bytes of address
/// followed by 2 bytes of big-endian port (BEP-5).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Addr(SocketAddrV4);

impl Addr {
    pub fn new(ip: Ipv4Addr, port: u16) -> Addr {
        Addr(SocketAddrV4::new(ip, port))
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(self.0)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Addr> {
        if bytes.len() != ADDR_LEN {
            return Err(Error::from(ErrorKind::WrongLength {
                what: "compact address",
                expected: ADDR_LEN,
                got: bytes.len(),
            }));
        }
        let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let port = u16::from_be_bytes([bytes[4], bytes[5]]);
        Ok(Addr::new(ip, port))
    }

    pub fn to_bytes(&self) -> [u8; ADDR_LEN] {
        let octets = self.ip().octets();
        let port = self.port().to_be_bytes();
        [
            octets[0], octets[1], octets[2], octets[3], port[0], port[1],
        ]
    }
}

impl From<SocketAddrV4> for Addr {
    fn from(addr: SocketAddrV4) -> Addr {
        Addr(addr)
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Addr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serde_bytes::Bytes::new(&self.to_bytes()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Addr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Addr, D::Error> {
        struct AddrVisitor;

        impl<'de> Visitor<'de> for AddrVisitor {
            type Value = Addr;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a {}-byte compact address", ADDR_LEN)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<Addr, E> {
                Addr::from_bytes(v).map_err(|_| de::Error::invalid_length(v.len(), &self))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<Addr, E> {
                self.visit_bytes(&v)
            }
        }

        deserializer.deserialize_bytes(AddrVisitor)
    }
}
