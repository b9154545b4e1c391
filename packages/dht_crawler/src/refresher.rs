use crate::node::DhtNode;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Periodically scans the routing table for buckets that have not
/// changed in a while and runs a node lookup targeting a random id
/// inside each one, keeping distant parts of the keyspace populated
/// even when nothing nearby queries this node.
pub fn spawn(node: Arc<DhtNode>, interval: Duration, staleness_minutes: i64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            refresh_stale_buckets(&node, staleness_minutes).await;
        }
    })
}

async fn refresh_stale_buckets(node: &Arc<DhtNode>, staleness_minutes: i64) {
    let staleness = ChronoDuration::minutes(staleness_minutes);
    let stale: Vec<usize> = {
        let table = node.routing_table.lock().unwrap();
        table
            .bucket_infos()
            .into_iter()
            .filter(|info| Utc::now() - info.last_changed >= staleness)
            .map(|info| info.depth)
            .collect()
    };

    for depth in stale {
        let target = node.own_id().random_in_subtree(depth);
        node.lookup_node(target).await;
    }
}
