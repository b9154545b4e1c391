use super::LookupBookkeeping;
use crate::verifier::NodeVerifier;
use crate::SharedRoutingTable;
use krpc_encoding::{Addr, InfoHash, NodeID, Response};
use routing_table::Node;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_krpc::KrpcTransport;

/// Result of the `get_peers` convergence phase, before any announce.
pub struct PeerLookupResult {
    pub peers: Vec<Addr>,
    pub closest: Vec<Node>,
    pub tokens_by_node: HashMap<NodeID, Vec<u8>>,
}

/// α-parallel iterative `get_peers` toward `info_hash`, structurally
/// identical to [`crate::lookup::node_lookup::run`] but accumulating
/// peer values and the token each responder hands back.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    info_hash: InfoHash,
    own_id: NodeID,
    transport: Arc<KrpcTransport>,
    routing_table: SharedRoutingTable,
    verifier: Arc<NodeVerifier>,
    alpha: usize,
    k: usize,
    iteration_cap: usize,
    total_queried_cap: usize,
    query_timeout: Duration,
) -> PeerLookupResult {
    let seed = routing_table.lock().unwrap().closest(&info_hash, k);
    let mut state = LookupBookkeeping::new(info_hash, seed);
    let mut peers: HashSet<Addr> = HashSet::new();
    let mut tokens_by_node: HashMap<NodeID, Vec<u8>> = HashMap::new();

    for _iteration in 0..iteration_cap {
        if state.queried.len() >= total_queried_cap || state.converged(k) {
            break;
        }

        let batch = state.next_to_query(alpha);
        if batch.is_empty() {
            break;
        }
        for node in &batch {
            state.queried.insert(node.id);
        }

        let queries = batch.into_iter().map(|node| {
            let transport = transport.clone();
            async move {
                let addr = node.endpoint.to_socket_addr();
                let result = transport.get_peers(own_id, addr, info_hash, query_timeout).await;
                (node, result)
            }
        });

        for (node, result) in futures::future::join_all(queries).await {
            match result {
                Ok(Response::GetPeers { token, peers: values, .. }) => {
                    state.responded.insert(node.id);
                    routing_table.lock().unwrap().mark_responded(&node.id);
                    if let Some(token) = token {
                        tokens_by_node.insert(node.id, token.into_vec());
                    }
                    peers.extend(values);
                }
                Ok(Response::NextHop { token, nodes, .. }) => {
                    state.responded.insert(node.id);
                    routing_table.lock().unwrap().mark_responded(&node.id);
                    if let Some(token) = token {
                        tokens_by_node.insert(node.id, token.into_vec());
                    }
                    for info in nodes {
                        if info.id == own_id {
                            continue;
                        }
                        state.merge_candidate(Node::new(info.id, info.addr));
                        let _ = verifier.enqueue(info.id, info.addr);
                    }
                }
                Ok(_) => {
                    log::debug!("get_peers reply from {} had an unexpected shape", node.endpoint);
                }
                Err(err) => {
                    log::trace!("get_peers to {} failed: {}", node.endpoint, err);
                    routing_table.lock().unwrap().mark_failed(&node.id);
                }
            }
        }
    }

    PeerLookupResult {
        peers: peers.into_iter().collect(),
        closest: state.closest_responded(k),
        tokens_by_node,
    }
}

/// Outcome of the token-gated announce phase.
pub struct AnnounceResult {
    pub success: bool,
    pub announced_to: usize,
}

/// Announce to every node in `tokens_by_node` that also appears among
/// `closest` (bounded by the k closest responders from the preceding
/// lookup), gated by the token each handed back in `get_peers`.
pub async fn announce(
    info_hash: InfoHash,
    own_id: NodeID,
    transport: Arc<KrpcTransport>,
    closest: &[Node],
    tokens_by_node: &HashMap<NodeID, Vec<u8>>,
    port: Option<u16>,
    implied_port: bool,
    query_timeout: Duration,
) -> AnnounceResult {
    let targets: Vec<(Node, Vec<u8>)> = closest
        .iter()
        .filter_map(|node| tokens_by_node.get(&node.id).map(|token| (node.clone(), token.clone())))
        .collect();

    let announces = targets.into_iter().map(|(node, token)| {
        let transport = transport.clone();
        async move {
            let addr = node.endpoint.to_socket_addr();
            transport
                .announce_peer(own_id, addr, info_hash, token, port, implied_port, query_timeout)
                .await
        }
    });

    let results = futures::future::join_all(announces).await;
    let announced_to = results.iter().filter(|r| r.is_ok()).count();

    AnnounceResult {
        success: announced_to > 0,
        announced_to,
    }
}
