use crate::config::DhtConfig;
use crate::errors::{Error, ErrorKind, Result};
use crate::events::{Event, EventBus};
use crate::lookup::{node_lookup, peer_lookup};
use crate::peer_store::PeerStore;
use crate::query_handler::QueryHandler;
use crate::verifier::NodeVerifier;
use crate::{AnnounceResult, PeerLookupResult, SharedRoutingTable};
use futures::future::{BoxFuture, FutureExt, Shared};
use krpc_encoding::{Addr, InfoHash, NodeID};
use routing_table::{Node, RoutingTable};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_krpc::KrpcTransport;

/// The local DHT participant: the composed routing table, peer store,
/// token manager, transport and verifier, plus whatever background
/// tasks keep them current. Every collaborator is a plain field — there
/// is exactly one of each, owned here, with no global state anywhere
/// else in the crate.
pub struct DhtNode {
    pub(crate) own_id: NodeID,
    pub(crate) config: DhtConfig,
    pub(crate) transport: Arc<KrpcTransport>,
    pub(crate) routing_table: SharedRoutingTable,
    pub(crate) peer_store: Arc<PeerStore>,
    pub(crate) tokens: Arc<tokio_krpc::TokenManager>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) verifier: Arc<NodeVerifier>,
    running: AtomicBool,
    node_lookups: AsyncMutex<HashMap<NodeID, Shared<BoxFuture<'static, Vec<Node>>>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl DhtNode {
    /// Bind the UDP socket and construct every collaborator, but do not
    /// yet start servicing queries or bootstrap — call [`DhtNode::start`]
    /// for that.
    pub async fn bind(
        config: DhtConfig,
        peer_store_ttl_secs: i64,
        peer_store_capacity: usize,
    ) -> Result<(Arc<DhtNode>, tokio::sync::mpsc::Receiver<tokio_krpc::InboundQuery>)> {
        let own_id = NodeID::random();
        let (transport, inbound_rx, reader_handle) =
            KrpcTransport::bind(config.port, config.max_transactions).await?;
        let transport = Arc::new(transport);

        let routing_table: SharedRoutingTable =
            Arc::new(Mutex::new(RoutingTable::with_k(own_id, config.k_bucket_size)));
        let peer_store = Arc::new(PeerStore::new(peer_store_ttl_secs, peer_store_capacity));
        let tokens = Arc::new(tokio_krpc::TokenManager::new(config.token_rotation_interval_secs));
        let events = Arc::new(EventBus::new());

        let hook_events = events.clone();
        transport.set_sent_hook(Arc::new(move |method, to| {
            hook_events.publish(Event::MessageSent { method, to: addr_of(to) });
        }));

        let verifier = Arc::new(NodeVerifier::spawn(
            transport.clone(),
            routing_table.clone(),
            own_id,
            events.clone(),
            config.verifier_queue_capacity,
            Duration::from_secs(config.verifier_settle_delay_secs),
            Duration::from_secs(config.transaction_timeout_secs),
            config.verifier_cache_ttl_secs,
        ));

        events.publish(Event::SystemStarted {
            local_addr: addr_of(transport.local_addr()),
        });

        let node = Arc::new(DhtNode {
            own_id,
            config,
            transport,
            routing_table,
            peer_store,
            tokens,
            events,
            verifier,
            running: AtomicBool::new(false),
            node_lookups: AsyncMutex::new(HashMap::new()),
            background: Mutex::new(vec![reader_handle]),
        });

        Ok((node, inbound_rx))
    }

    pub fn own_id(&self) -> NodeID {
        self.own_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn routing_table_size(&self) -> usize {
        self.routing_table.lock().unwrap().size()
    }

    /// Wire-level traffic counters, incremented by the transport at the
    /// point each query/response/error/timeout is dispatched.
    pub fn transport_stats(&self) -> tokio_krpc::TransportStatsSnapshot {
        self.transport.stats()
    }

    /// Peers this node has learned about `info_hash`, either via
    /// `announce_peer` from a remote or via its own `get_peers` lookups.
    pub fn peers_for(&self, info_hash: InfoHash) -> Vec<Addr> {
        self.peer_store.get(&info_hash)
    }

    /// Begin servicing inbound queries and rotating tokens. Idempotent:
    /// calling twice has no extra effect.
    pub fn start(self: &Arc<Self>, mut inbound_rx: tokio::sync::mpsc::Receiver<tokio_krpc::InboundQuery>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let query_handler = QueryHandler::new(
            self.own_id,
            self.routing_table.clone(),
            self.peer_store.clone(),
            self.tokens.clone(),
            self.verifier.clone(),
            self.events.clone(),
            self.config.k_bucket_size,
        );
        let transport = self.transport.clone();
        let query_loop = tokio::spawn(async move {
            while let Some(inbound) = inbound_rx.recv().await {
                query_handler.handle(&transport, inbound).await;
            }
        });

        let tokens = self.tokens.clone();
        let rotation_interval = Duration::from_secs(self.config.token_rotation_interval_secs.max(1) as u64);
        let token_ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(rotation_interval);
            loop {
                interval.tick().await;
                tokens.maybe_rotate();
            }
        });

        let mut background = self.background.lock().unwrap();
        background.push(query_loop);
        background.push(token_ticker);
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.events.publish(Event::SystemStopped);
        for handle in self.background.lock().unwrap().drain(..) {
            handle.abort();
        }
    }

    /// Converge on the k nodes closest to `target`, deduplicating
    /// against any lookup already in flight for the same target rather
    /// than starting a redundant one.
    pub async fn lookup_node(self: &Arc<Self>, target: NodeID) -> Vec<Node> {
        let existing = {
            let map = self.node_lookups.lock().await;
            map.get(&target).cloned()
        };
        if let Some(inflight) = existing {
            return inflight.await;
        }

        let node = self.clone();
        let fut: BoxFuture<'static, Vec<Node>> = Box::pin(async move {
            node_lookup::run(
                target,
                node.own_id,
                node.transport.clone(),
                node.routing_table.clone(),
                node.verifier.clone(),
                node.config.alpha,
                node.config.k_bucket_size,
                node.config.max_results,
                node.config.lookup_iteration_cap,
                node.config.lookup_total_queried_cap,
                Duration::from_secs(node.config.transaction_timeout_secs),
            )
            .await
        });
        let shared = fut.shared();

        {
            let mut map = self.node_lookups.lock().await;
            map.entry(target).or_insert_with(|| shared.clone());
        }

        let result = shared.await;
        self.node_lookups.lock().await.remove(&target);
        result
    }

    /// Converge on `info_hash` via `get_peers`, returning any peers
    /// found plus the closest responders and their announce tokens.
    pub async fn lookup_peers(self: &Arc<Self>, info_hash: InfoHash) -> PeerLookupResult {
        peer_lookup::run(
            info_hash,
            self.own_id,
            self.transport.clone(),
            self.routing_table.clone(),
            self.verifier.clone(),
            self.config.alpha,
            self.config.k_bucket_size,
            self.config.lookup_iteration_cap,
            self.config.lookup_total_queried_cap,
            Duration::from_secs(self.config.transaction_timeout_secs),
        )
        .await
    }

    /// Look up `info_hash`, then announce to the closest responders
    /// that granted a token. The combined BEP-5 "get_peers then
    /// announce_peer" flow a client uses to publish a torrent.
    pub async fn announce(
        self: &Arc<Self>,
        info_hash: InfoHash,
        port: Option<u16>,
        implied_port: bool,
    ) -> AnnounceResult {
        let lookup = self.lookup_peers(info_hash).await;
        peer_lookup::announce(
            info_hash,
            self.own_id,
            self.transport.clone(),
            &lookup.closest,
            &lookup.tokens_by_node,
            port,
            implied_port,
            Duration::from_secs(self.config.transaction_timeout_secs),
        )
        .await
    }

    /// Directly ping `endpoint` and, on success, feed it through the
    /// verifier pipeline like any other freshly learned node.
    pub async fn ping(&self, endpoint: Addr) -> Result<NodeID> {
        let dest = endpoint.to_socket_addr();
        let id = self
            .transport
            .ping(self.own_id, dest, Duration::from_secs(self.config.transaction_timeout_secs))
            .await?;
        let _ = self.verifier.enqueue(id, endpoint);
        Ok(id)
    }

    /// Learn a DHT port announced over a BT peer-wire connection (BEP-5's
    /// `PORT` message) and, like [`DhtNode::ping`], verify and admit the
    /// resulting endpoint. `peer_ip` is the TCP connection's remote
    /// address, supplied by the caller's peer-wire handler — it is not
    /// carried in the message itself.
    pub async fn learn_bt_port(&self, peer_ip: std::net::Ipv4Addr, message: &[u8]) -> Result<NodeID> {
        let port = crate::bt_port::decode_port_message(message)
            .ok_or_else(|| Error::from(ErrorKind::InvalidArgument {
                reason: "not a well-formed PORT message".to_string(),
            }))?;
        self.ping(Addr::new(peer_ip, port)).await
    }
}

fn addr_of(addr: SocketAddr) -> Addr {
    match addr {
        SocketAddr::V4(v4) => Addr::from(v4),
        SocketAddr::V6(_) => Addr::new(std::net::Ipv4Addr::UNSPECIFIED, addr.port()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;

    fn fast_config() -> DhtConfig {
        DhtConfig {
            port: 0,
            transaction_timeout_secs: 2,
            verifier_settle_delay_secs: 0,
            ..DhtConfig::default()
        }
    }

    async fn spawn_node() -> Arc<DhtNode> {
        let (node, rx) = DhtNode::bind(fast_config(), 1800, 1000).await.unwrap();
        node.start(rx);
        node
    }

    /// Bootstrap `node` through `peer`, then give the verifier pipeline
    /// a moment to admit the freshly learned node into the routing
    /// table before the caller relies on it being there.
    async fn bootstrap_and_settle(node: &Arc<DhtNode>, peer: &Arc<DhtNode>) {
        bootstrap::run(node, &[peer.local_addr().to_string()]).await.unwrap();
        tokio::time::delay_for(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn ping_learns_the_peer_id() {
        let a = spawn_node().await;
        let b = spawn_node().await;

        let learned = a.ping(addr_of(b.local_addr())).await.unwrap();
        assert_eq!(learned, b.own_id());
    }

    #[tokio::test]
    async fn lookup_node_converges_through_a_bootstrap_peer() {
        let a = spawn_node().await;
        let b = spawn_node().await;
        let c = spawn_node().await;

        bootstrap_and_settle(&b, &a).await;
        bootstrap_and_settle(&c, &a).await;

        let found = b.lookup_node(c.own_id()).await;
        assert!(found.iter().any(|n| n.id == c.own_id()) || found.iter().any(|n| n.id == a.own_id()));
    }

    #[tokio::test]
    async fn concurrent_lookups_for_the_same_target_are_coalesced() {
        let a = spawn_node().await;
        let target = NodeID::random();

        let a1 = a.clone();
        let a2 = a.clone();
        let (r1, r2) = tokio::join!(a1.lookup_node(target), a2.lookup_node(target));
        assert_eq!(r1.len(), r2.len());
    }

    #[tokio::test]
    async fn announce_then_lookup_peers_finds_the_peer() {
        let a = spawn_node().await;
        let b = spawn_node().await;
        bootstrap_and_settle(&b, &a).await;

        let info_hash = InfoHash::random();
        let result = b.announce(info_hash, Some(6999), false).await;
        assert!(result.success);

        let seen = a.peer_store.get(&info_hash);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].port(), 6999);
    }

    #[tokio::test]
    async fn announce_with_implied_port_uses_source_port() {
        let a = spawn_node().await;
        let b = spawn_node().await;
        bootstrap_and_settle(&b, &a).await;

        let info_hash = InfoHash::random();
        b.announce(info_hash, None, true).await;

        let seen = a.peer_store.get(&info_hash);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].port(), b.local_addr().port());
    }

    #[tokio::test]
    async fn learn_bt_port_pings_the_announced_endpoint() {
        let a = spawn_node().await;
        let b = spawn_node().await;

        let message = crate::bt_port::encode_port_message(b.local_addr().port());
        let learned = a.learn_bt_port(std::net::Ipv4Addr::new(127, 0, 0, 1), &message).await.unwrap();
        assert_eq!(learned, b.own_id());
    }

    #[tokio::test]
    async fn learn_bt_port_rejects_malformed_messages() {
        let a = spawn_node().await;
        assert!(a.learn_bt_port(std::net::Ipv4Addr::new(127, 0, 0, 1), &[1, 2, 3]).await.is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let a = spawn_node().await;
        a.stop();
        a.stop();
    }
}
