//! Transaction-multiplexed KRPC request/response layer over UDP: a
//! non-blocking socket, an outstanding-transaction table, and the
//! BEP-5 token rotation scheme. No routing table or peer storage
//! lives here — this crate only speaks the wire protocol.

mod active_transactions;
pub mod errors;
mod response_future;
mod socket;
mod token;
mod transaction;
mod transport;

pub use errors::{Error, ErrorKind, Result};
pub use socket::{KrpcSocket, PORT_FALLBACK_ATTEMPTS};
pub use token::TokenManager;
pub use transaction::{TransactionId, TransactionKey};
pub use transport::{InboundQuery, KrpcTransport, SentHook, TransportStatsSnapshot};
