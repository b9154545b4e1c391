use super::LookupBookkeeping;
use crate::verifier::NodeVerifier;
use crate::SharedRoutingTable;
use krpc_encoding::{NodeID, Response};
use routing_table::Node;
use std::sync::Arc;
use std::time::Duration;
use tokio_krpc::KrpcTransport;

/// α-parallel iterative `find_node` convergence toward `target`. Runs
/// to completion in this call — no callbacks are registered anywhere
/// else. `k` bounds the internal seeding/convergence check (bucket
/// capacity); `max_results` separately bounds how many of the
/// converged nodes are actually returned to the caller, per the
/// distinction between K and `maxResults`.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    target: NodeID,
    own_id: NodeID,
    transport: Arc<KrpcTransport>,
    routing_table: SharedRoutingTable,
    verifier: Arc<NodeVerifier>,
    alpha: usize,
    k: usize,
    max_results: usize,
    iteration_cap: usize,
    total_queried_cap: usize,
    query_timeout: Duration,
) -> Vec<Node> {
    let seed = routing_table.lock().unwrap().closest(&target, k);
    let mut state = LookupBookkeeping::new(target, seed);

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
                let result = transport.find_node(own_id, addr, target, query_timeout).await;
                (node, result)
            }
        });

        for (node, result) in futures::future::join_all(queries).await {
            match result {
                Ok(Response::NextHop { nodes, .. }) => {
                    state.responded.insert(node.id);
                    routing_table.lock().unwrap().mark_responded(&node.id);
                    for info in nodes {
                        if info.id == own_id {
                            continue;
                        }
                        state.merge_candidate(Node::new(info.id, info.addr));
                        let _ = verifier.enqueue(info.id, info.addr);
                    }
                }
                Ok(_) => {
                    log::debug!("find_node reply from {} had an unexpected shape", node.endpoint);
                }
                Err(err) => {
                    log::trace!("find_node to {} failed: {}", node.endpoint, err);
                    routing_table.lock().unwrap().mark_failed(&node.id);
                }
            }
        }
    }

    state.closest_responded(max_results)
}
