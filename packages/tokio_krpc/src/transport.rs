use crate::active_transactions::ActiveTransactions;
use crate::errors::{Error, ErrorKind, Result};
use crate::response_future::ResponseFuture;
use crate::socket::KrpcSocket;
use crate::transaction::{self, TransactionId};
use krpc_encoding::{Envelope, MessageType, NodeID, Query, Response, MAX_MESSAGE_LEN};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// An inbound query still needing a reply, handed to whoever is
/// servicing [`KrpcTransport::bind`]'s query stream.
pub struct InboundQuery {
    pub query: Query,
    pub sender: SocketAddr,
    pub transaction_id: Vec<u8>,
    pub read_only: bool,
}

/// Called for every datagram this transport sends (queries and
/// replies alike), so an owning layer can publish its own notion of a
/// "message sent" event without this crate depending on one.
pub type SentHook = Arc<dyn Fn(&'static str, SocketAddr) + Send + Sync>;

/// Running counts of traffic this transport has dispatched, updated at
/// the same point that response/error/timeout resolution happens so a
/// caller never has to parse traffic itself to track them.
#[derive(Default)]
struct TransportStats {
    queries_sent: AtomicU64,
    responses_received: AtomicU64,
    errors_received: AtomicU64,
    timeouts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStatsSnapshot {
    pub queries_sent: u64,
    pub responses_received: u64,
    pub errors_received: u64,
    pub timeouts: u64,
}

/// Send half of the KRPC wire: outbound queries keyed by a
/// process-global monotonic transaction id, paired with destination in
/// the transaction table so ids are only unique per-peer.
pub struct KrpcTransport {
    socket: Arc<KrpcSocket>,
    transactions: ActiveTransactions,
    next_tid: AtomicU16,
    stats: TransportStats,
    sent_hook: Mutex<Option<SentHook>>,
}

impl KrpcTransport {
    /// Bind the socket, spawn the datagram reader, and return the
    /// transport, a stream of inbound queries the caller must service,
    /// and the reader's join handle for clean shutdown.
    pub async fn bind(
        port: u16,
        max_transactions: usize,
    ) -> Result<(KrpcTransport, mpsc::Receiver<InboundQuery>, JoinHandle<()>)> {
        let socket = Arc::new(KrpcSocket::bind(port).await?);
        let transactions = ActiveTransactions::new(max_transactions);
        let (query_tx, query_rx) = mpsc::channel(256);

        let reader_socket = socket.clone();
        let reader_transactions = transactions.clone();
        let handle = tokio::spawn(async move {
            recv_loop(reader_socket, reader_transactions, query_tx).await;
        });

        Ok((
            KrpcTransport {
                socket,
                transactions,
                next_tid: AtomicU16::new(0),
                stats: TransportStats::default(),
                sent_hook: Mutex::new(None),
            },
            query_rx,
            handle,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub fn in_flight(&self) -> usize {
        self.transactions.len()
    }

    /// Install the hook called for every datagram this transport
    /// sends. Replaces any previously installed hook.
    pub fn set_sent_hook(&self, hook: SentHook) {
        *self.sent_hook.lock().unwrap() = Some(hook);
    }

    pub fn stats(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            queries_sent: self.stats.queries_sent.load(Ordering::Relaxed),
            responses_received: self.stats.responses_received.load(Ordering::Relaxed),
            errors_received: self.stats.errors_received.load(Ordering::Relaxed),
            timeouts: self.stats.timeouts.load(Ordering::Relaxed),
        }
    }

    fn notify_sent(&self, method: &'static str, dest: SocketAddr) {
        if let Some(hook) = self.sent_hook.lock().unwrap().as_ref() {
            hook(method, dest);
        }
    }

    fn allocate_tid(&self) -> TransactionId {
        self.next_tid.fetch_add(1, Ordering::Relaxed)
    }

    /// Reply to a query the caller received via the inbound-query
    /// stream. `observed` is the compact endpoint to echo back in `ip`
    /// for BEP-42-aware peers.
    pub async fn reply(
        &self,
        transaction_id: Vec<u8>,
        response: Response,
        dest: SocketAddr,
        observed: Option<krpc_encoding::Addr>,
    ) -> Result<()> {
        let envelope = Envelope::response(transaction_id, response, observed);
        self.send_raw(&envelope, dest).await?;
        self.notify_sent("reply", dest);
        Ok(())
    }

    pub async fn reply_error(
        &self,
        transaction_id: Vec<u8>,
        error: krpc_encoding::KRPCError,
        dest: SocketAddr,
    ) -> Result<()> {
        let envelope = Envelope::error(transaction_id, error);
        self.send_raw(&envelope, dest).await?;
        self.notify_sent("reply_error", dest);
        Ok(())
    }

    async fn send_raw(&self, envelope: &Envelope, dest: SocketAddr) -> Result<()> {
        let bytes = envelope.encode()?;
        self.socket.send_to(&bytes, dest).await?;
        Ok(())
    }

    /// Issue a query to `dest` and await its response, erroring out
    /// after `timeout` elapses with no reply.
    pub async fn request(&self, dest: SocketAddr, query: Query, timeout: Duration) -> Result<Response> {
        let tid = self.allocate_tid();
        let key = (tid, dest);
        let method = query.method_name();
        let envelope = Envelope::query(transaction::encode(tid), query);

        self.send_raw(&envelope, dest).await?;
        self.stats.queries_sent.fetch_add(1, Ordering::Relaxed);
        self.notify_sent(method, dest);

        let wait = ResponseFuture::wait_for(key, self.transactions.clone());
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(message_type)) => match message_type {
                MessageType::Response { response } => {
                    self.stats.responses_received.fetch_add(1, Ordering::Relaxed);
                    Ok(response)
                }
                MessageType::Error { error } => {
                    self.stats.errors_received.fetch_add(1, Ordering::Relaxed);
                    Err(Error::from(ErrorKind::Peer(error)))
                }
                MessageType::Query { .. } => Err(Error::from(ErrorKind::UnexpectedResponse)),
            },
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => {
                self.transactions.timeout(key);
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                Err(Error::from(ErrorKind::Timeout))
            }
        }
    }

    pub async fn ping(&self, id: NodeID, dest: SocketAddr, timeout: Duration) -> Result<NodeID> {
        match self.request(dest, Query::Ping { id }, timeout).await? {
            Response::OnlyID { id } => Ok(id),
            _ => Err(Error::from(ErrorKind::UnexpectedResponse)),
        }
    }

    pub async fn find_node(
        &self,
        id: NodeID,
        dest: SocketAddr,
        target: NodeID,
        timeout: Duration,
    ) -> Result<Response> {
        let response = self.request(dest, Query::FindNode { id, target }, timeout).await?;
        match response {
            Response::NextHop { .. } => Ok(response),
            _ => Err(Error::from(ErrorKind::UnexpectedResponse)),
        }
    }

    pub async fn get_peers(
        &self,
        id: NodeID,
        dest: SocketAddr,
        info_hash: NodeID,
        timeout: Duration,
    ) -> Result<Response> {
        let response = self.request(dest, Query::GetPeers { id, info_hash }, timeout).await?;
        match response {
            Response::NextHop { .. } | Response::GetPeers { .. } => Ok(response),
            _ => Err(Error::from(ErrorKind::UnexpectedResponse)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn announce_peer(
        &self,
        id: NodeID,
        dest: SocketAddr,
        info_hash: NodeID,
        token: Vec<u8>,
        port: Option<u16>,
        implied_port: bool,
        timeout: Duration,
    ) -> Result<NodeID> {
        let query = Query::AnnouncePeer {
            id,
            implied_port,
            port,
            info_hash,
            token,
        };
        match self.request(dest, query, timeout).await? {
            Response::OnlyID { id } => Ok(id),
            _ => Err(Error::from(ErrorKind::UnexpectedResponse)),
        }
    }
}

async fn recv_loop(
    socket: Arc<KrpcSocket>,
    transactions: ActiveTransactions,
    mut query_tx: mpsc::Sender<InboundQuery>,
) {
    let mut buf = [0u8; MAX_MESSAGE_LEN];
    loop {
        let (len, sender) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("KRPC socket closed: {}", err);
                return;
            }
        };

        let envelope = match Envelope::decode(&buf[..len]) {
            Ok(envelope) => envelope,
            Err(err) => {
                log::warn!("dropping malformed datagram from {}: {}", sender, err);
                continue;
            }
        };

        match envelope.message_type {
            MessageType::Query { query } => {
                let inbound = InboundQuery {
                    transaction_id: envelope.transaction_id,
                    sender,
                    query,
                    read_only: envelope.read_only,
                };
                if query_tx.send(inbound).await.is_err() {
                    log::warn!("no query handler listening, dropping query from {}", sender);
                }
            }
            MessageType::Response { response } => {
                if let Some(tid) = transaction::decode(&envelope.transaction_id) {
                    transactions.dispatch((tid, sender), Ok(MessageType::Response { response }));
                } else {
                    log::warn!("response from {} has unparseable transaction id", sender);
                }
            }
            MessageType::Error { error } => {
                if let Some(tid) = transaction::decode(&envelope.transaction_id) {
                    transactions.dispatch((tid, sender), Err(Error::from(ErrorKind::Peer(error))));
                } else {
                    log::warn!("error from {} has unparseable transaction id", sender);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ping_round_trip() {
        let (node_a, _rx_a, _handle_a) = KrpcTransport::bind(0, 64).await.unwrap();
        let (node_b, mut rx_b, _handle_b) = KrpcTransport::bind(0, 64).await.unwrap();
        let b_id = NodeID::random();
        let b_addr = node_b.local_addr();

        let responder = tokio::spawn(async move {
            let inbound = rx_b.recv().await.expect("expected a ping");
            assert!(matches!(inbound.query, Query::Ping { .. }));
            node_b
                .reply(inbound.transaction_id, Response::OnlyID { id: b_id }, inbound.sender, None)
                .await
                .unwrap();
        });

        let a_id = NodeID::random();
        let got = node_a
            .ping(a_id, b_addr, Duration::from_secs(2))
            .await
            .expect("ping should succeed");
        assert_eq!(got, b_id);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn ping_to_silent_peer_times_out() {
        let (node_a, _rx_a, _handle_a) = KrpcTransport::bind(0, 64).await.unwrap();
        let dead_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = node_a
            .ping(NodeID::random(), dead_addr, Duration::from_millis(50))
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().is_timeout_equivalent());
    }
}
