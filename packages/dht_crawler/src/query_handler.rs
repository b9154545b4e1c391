use crate::events::{Event, EventBus};
use crate::peer_store::PeerStore;
use crate::verifier::NodeVerifier;
use crate::SharedRoutingTable;
use krpc_encoding::{Addr, KRPCError, NodeID, Query, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_krpc::{InboundQuery, KrpcTransport, TokenManager};

/// Services every inbound KRPC query against the routing table, peer
/// store and token manager. Owned by [`crate::node::DhtNode`] and
/// driven from the transport's inbound-query stream.
pub struct QueryHandler {
    own_id: NodeID,
    routing_table: SharedRoutingTable,
    peer_store: Arc<PeerStore>,
    tokens: Arc<TokenManager>,
    verifier: Arc<NodeVerifier>,
    events: Arc<EventBus>,
    /// Bucket capacity (`k_bucket_size`), not the user-facing lookup
    /// result cap — `find_node`/`get_peers`-without-peers replies are
    /// sized to fill a bucket, per BEP-5.
    k: usize,
}

impl QueryHandler {
    pub fn new(
        own_id: NodeID,
        routing_table: SharedRoutingTable,
        peer_store: Arc<PeerStore>,
        tokens: Arc<TokenManager>,
        verifier: Arc<NodeVerifier>,
        events: Arc<EventBus>,
        k: usize,
    ) -> QueryHandler {
        QueryHandler {
            own_id,
            routing_table,
            peer_store,
            tokens,
            verifier,
            events,
            k,
        }
    }

    /// Handle one inbound query and send the appropriate reply (or
    /// error reply) back over `transport`.
    pub async fn handle(&self, transport: &KrpcTransport, inbound: InboundQuery) {
        let InboundQuery {
            query,
            sender,
            transaction_id,
            ..
        } = inbound;

        self.events.publish(Event::MessageReceived {
            method: query.method_name(),
            from: addr_of(sender),
        });

        // Learning about the sender happens regardless of whether the
        // query itself is well formed enough to answer, as long as it
        // carries an id at all.
        if let Some(observed) = addr_of_opt(sender) {
            let _ = self.verifier.enqueue(query.id(), observed);
        }

        let outcome = match query {
            Query::Ping { .. } => Ok(Response::OnlyID { id: self.own_id }),
            Query::FindNode { target, .. } => Ok(self.handle_find_node(target)),
            Query::GetPeers { info_hash, .. } => Ok(self.handle_get_peers(info_hash, sender)),
            Query::AnnouncePeer {
                info_hash,
                token,
                port,
                implied_port,
                ..
            } => self.handle_announce_peer(info_hash, token, port, implied_port, sender),
        };

        let send_result = match outcome {
            Ok(response) => {
                transport
                    .reply(transaction_id, response, sender, addr_of_opt(sender))
                    .await
            }
            Err(error) => transport.reply_error(transaction_id, error, sender).await,
        };

        if let Err(err) = send_result {
            log::warn!("failed to reply to {}: {}", sender, err);
        }
    }

    fn handle_find_node(&self, target: NodeID) -> Response {
        let nodes = self
            .routing_table
            .lock()
            .unwrap()
            .closest(&target, self.k)
            .iter()
            .map(|n| n.into())
            .collect();
        Response::NextHop {
            id: self.own_id,
            token: None,
            nodes,
        }
    }

    fn handle_get_peers(&self, info_hash: NodeID, sender: SocketAddr) -> Response {
        let token = self.tokens.generate(sender);
        let peers = self.peer_store.get(&info_hash);

        if !peers.is_empty() {
            Response::GetPeers {
                id: self.own_id,
                token: Some(serde_bytes::ByteBuf::from(token)),
                peers,
            }
        } else {
            let nodes = self
                .routing_table
                .lock()
                .unwrap()
                .closest(&info_hash, self.k)
                .iter()
                .map(|n| n.into())
                .collect();
            Response::NextHop {
                id: self.own_id,
                token: Some(serde_bytes::ByteBuf::from(token)),
                nodes,
            }
        }
    }

    fn handle_announce_peer(
        &self,
        info_hash: NodeID,
        token: Vec<u8>,
        port: Option<u16>,
        implied_port: bool,
        sender: SocketAddr,
    ) -> Result<Response, KRPCError> {
        if !self.tokens.verify(&token, sender) {
            return Err(KRPCError::new(KRPCError::PROTOCOL, "invalid token"));
        }

        let endpoint = if implied_port {
            addr_of(sender)
        } else {
            match port {
                Some(port) => Addr::new(ip_of(sender), port),
                None => return Err(KRPCError::new(KRPCError::PROTOCOL, "invalid argument")),
            }
        };

        self.peer_store.insert(info_hash, endpoint);
        self.events.publish(Event::PeerDiscovered {
            info_hash,
            endpoint,
        });

        Ok(Response::OnlyID { id: self.own_id })
    }
}

fn ip_of(addr: SocketAddr) -> std::net::Ipv4Addr {
    match addr.ip() {
        std::net::IpAddr::V4(ip) => ip,
        std::net::IpAddr::V6(_) => std::net::Ipv4Addr::UNSPECIFIED,
    }
}

fn addr_of(addr: SocketAddr) -> Addr {
    Addr::new(ip_of(addr), addr.port())
}

fn addr_of_opt(addr: SocketAddr) -> Option<Addr> {
    match addr.ip() {
        std::net::IpAddr::V4(_) => Some(addr_of(addr)),
        std::net::IpAddr::V6(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::peer_store::PeerStore;
    use crate::verifier::NodeVerifier;
    use krpc_encoding::InfoHash;
    use routing_table::RoutingTable;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_krpc::{KrpcTransport, TokenManager};

    async fn handler() -> (QueryHandler, NodeID) {
        let own_id = NodeID::random();
        let (transport, _rx, _handle) = KrpcTransport::bind(0, 64).await.unwrap();
        let routing_table = Arc::new(Mutex::new(RoutingTable::new(own_id)));
        let peer_store = Arc::new(PeerStore::new(1800, 1000));
        let tokens = Arc::new(TokenManager::new(300));
        let events = Arc::new(EventBus::new());
        let verifier = Arc::new(NodeVerifier::spawn(
            Arc::new(transport),
            routing_table.clone(),
            own_id,
            events.clone(),
            64,
            Duration::from_millis(1),
            Duration::from_secs(1),
            3600,
        ));
        (
            QueryHandler::new(own_id, routing_table, peer_store, tokens, verifier, events, 16),
            own_id,
        )
    }

    fn sender() -> SocketAddr {
        SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 4000)
    }

    #[tokio::test]
    async fn find_node_replies_with_own_id_and_no_nodes_when_table_empty() {
        let (handler, own_id) = handler().await;
        match handler.handle_find_node(NodeID::random()) {
            Response::NextHop { id, nodes, .. } => {
                assert_eq!(id, own_id);
                assert!(nodes.is_empty());
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn get_peers_without_known_peers_returns_token_and_nodes() {
        let (handler, _) = handler().await;
        let info_hash = InfoHash::random();
        match handler.handle_get_peers(info_hash, sender()) {
            Response::NextHop { token, .. } => assert!(token.is_some()),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn get_peers_with_known_peers_returns_values() {
        let (handler, _) = handler().await;
        let info_hash = InfoHash::random();
        handler
            .peer_store
            .insert(info_hash, Addr::new(Ipv4Addr::new(10, 0, 0, 1), 6881));
        match handler.handle_get_peers(info_hash, sender()) {
            Response::GetPeers { peers, .. } => assert_eq!(peers.len(), 1),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn announce_peer_rejects_unknown_token() {
        let (handler, _) = handler().await;
        let result = handler.handle_announce_peer(
            InfoHash::random(),
            b"not-a-real-token".to_vec(),
            Some(6881),
            false,
            sender(),
        );
        assert_eq!(result.unwrap_err().code(), KRPCError::PROTOCOL);
    }

    #[tokio::test]
    async fn announce_peer_with_valid_token_stores_peer() {
        let (handler, _) = handler().await;
        let from = sender();
        let info_hash = InfoHash::random();
        let token = handler.tokens.generate(from);

        let result = handler.handle_announce_peer(info_hash, token, Some(6882), false, from);
        assert!(result.is_ok());
        assert_eq!(handler.peer_store.get(&info_hash).len(), 1);
    }

    #[tokio::test]
    async fn announce_peer_with_implied_port_uses_source_port() {
        let (handler, _) = handler().await;
        let from = sender();
        let info_hash = InfoHash::random();
        let token = handler.tokens.generate(from);

        handler
            .handle_announce_peer(info_hash, token, None, true, from)
            .unwrap();
        let peers = handler.peer_store.get(&info_hash);
        assert_eq!(peers[0].port(), from.port());
    }
}
