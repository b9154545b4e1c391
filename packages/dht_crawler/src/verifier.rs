use crate::errors::{Error, ErrorKind, Result};
use crate::events::{Event, EventBus};
use crate::SharedRoutingTable;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use krpc_encoding::{Addr, NodeID};
use routing_table::{AddOutcome, Node};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_krpc::KrpcTransport;

struct Candidate {
    id: NodeID,
    endpoint: Addr,
}

/// Deferred ping-then-admit pipeline for newly learned nodes. Nothing
/// is added to the routing table until it has answered a ping; the
/// same ping primitive also resolves the
/// "evict the oldest questionable node" decision a full bucket can
/// raise when [`routing_table::RoutingTable::add`] returns
/// [`AddOutcome::PingRequired`].
pub struct NodeVerifier {
    queue_tx: mpsc::Sender<Candidate>,
}

impl NodeVerifier {
    pub fn spawn(
        transport: Arc<KrpcTransport>,
        routing_table: SharedRoutingTable,
        own_id: NodeID,
        events: Arc<EventBus>,
        queue_capacity: usize,
        settle_delay: Duration,
        query_timeout: Duration,
        cache_ttl_secs: i64,
    ) -> NodeVerifier {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);
        tokio::spawn(run(
            queue_rx,
            transport,
            routing_table,
            own_id,
            events,
            settle_delay,
            query_timeout,
            ChronoDuration::seconds(cache_ttl_secs),
        ));
        NodeVerifier { queue_tx }
    }

    /// Enqueue a newly learned `(id, endpoint)` for ping-then-admit.
    /// Rejects with `VerifierQueueFull` if the queue is already full.
    pub fn enqueue(&self, id: NodeID, endpoint: Addr) -> Result<()> {
        self.queue_tx
            .clone()
            .try_send(Candidate { id, endpoint })
            .map_err(|_| Error::from(ErrorKind::VerifierQueueFull))
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    mut queue_rx: mpsc::Receiver<Candidate>,
    transport: Arc<KrpcTransport>,
    routing_table: SharedRoutingTable,
    own_id: NodeID,
    events: Arc<EventBus>,
    settle_delay: Duration,
    query_timeout: Duration,
    cache_ttl: ChronoDuration,
) {
    let mut recently_verified: HashMap<NodeID, DateTime<Utc>> = HashMap::new();

    while let Some(candidate) = queue_rx.recv().await {
        tokio::time::delay_for(settle_delay).await;

        recently_verified.retain(|_, at| Utc::now() - *at < cache_ttl);
        if recently_verified.contains_key(&candidate.id) {
            continue;
        }

        let dest = candidate.endpoint.to_socket_addr();
        match transport.ping(own_id, dest, query_timeout).await {
            Ok(_) => {
                recently_verified.insert(candidate.id, Utc::now());
                admit(&routing_table, &transport, own_id, &events, candidate, query_timeout).await;
            }
            Err(err) => {
                log::debug!("verifier: {} did not respond to ping: {}", dest, err);
            }
        }
    }
}

async fn admit(
    routing_table: &SharedRoutingTable,
    transport: &Arc<KrpcTransport>,
    own_id: NodeID,
    events: &Arc<EventBus>,
    candidate: Candidate,
    query_timeout: Duration,
) {
    let node = Node::new(candidate.id, candidate.endpoint);
    let outcome = routing_table.lock().unwrap().add(node);

    match outcome {
        AddOutcome::Inserted => {
            events.publish(Event::NodeDiscovered {
                id: candidate.id,
                endpoint: candidate.endpoint,
            });
        }
        AddOutcome::Refreshed => {}
        AddOutcome::Dropped => {
            log::trace!("verifier: {} dropped, bucket full of good nodes", candidate.id);
        }
        AddOutcome::PingRequired { candidate: old, pending } => {
            let old_addr = old.endpoint.to_socket_addr();
            match transport.ping(own_id, old_addr, query_timeout).await {
                Ok(_) => {
                    routing_table.lock().unwrap().keep_candidate(&old.id);
                }
                Err(_) => {
                    let pending_id = pending.id;
                    let pending_endpoint = pending.endpoint;
                    routing_table.lock().unwrap().evict_and_insert(&old.id, pending);
                    events.publish(Event::NodeDiscovered {
                        id: pending_id,
                        endpoint: pending_endpoint,
                    });
                }
            }
        }
    }
}
