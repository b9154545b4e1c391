use crate::config::CrawlerConfig;
use crate::events::Event;
use crate::node::DhtNode;
use chrono::{DateTime, Utc};
use krpc_encoding::{InfoHash, NodeID};
use rand::seq::SliceRandom;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_krpc::KrpcTransport;

/// Running counters surfaced to callers (and, via the binary, logged
/// periodically) for visibility into what the crawler has found.
/// `nodes_responded`, `queries_sent`, `responses_received`,
/// `errors_received` and `timeouts` are read straight off the
/// transport's own dispatch-point counters rather than duplicated here
/// — the crawler never parses traffic itself.
pub struct CrawlerStatistics {
    started_at: DateTime<Utc>,
    nodes_discovered: AtomicU64,
    peers_discovered: AtomicU64,
    info_hashes_discovered: AtomicU64,
    lookups_run: AtomicU64,
    transport: Arc<KrpcTransport>,
}

#[derive(Debug, Clone, Copy, serde_derive::Serialize)]
pub struct CrawlerStatisticsSnapshot {
    pub nodes_discovered: u64,
    pub peers_discovered: u64,
    pub info_hashes_discovered: u64,
    pub lookups_run: u64,
    pub nodes_responded: u64,
    pub queries_sent: u64,
    pub responses_received: u64,
    pub errors_received: u64,
    pub timeouts: u64,
    pub uptime_secs: i64,
}

impl CrawlerStatistics {
    fn new(transport: Arc<KrpcTransport>) -> CrawlerStatistics {
        CrawlerStatistics {
            started_at: Utc::now(),
            nodes_discovered: AtomicU64::new(0),
            peers_discovered: AtomicU64::new(0),
            info_hashes_discovered: AtomicU64::new(0),
            lookups_run: AtomicU64::new(0),
            transport,
        }
    }

    pub fn snapshot(&self) -> CrawlerStatisticsSnapshot {
        let wire = self.transport.stats();
        CrawlerStatisticsSnapshot {
            nodes_discovered: self.nodes_discovered.load(Ordering::Relaxed),
            peers_discovered: self.peers_discovered.load(Ordering::Relaxed),
            info_hashes_discovered: self.info_hashes_discovered.load(Ordering::Relaxed),
            lookups_run: self.lookups_run.load(Ordering::Relaxed),
            // One response is one node responding.
            nodes_responded: wire.responses_received,
            queries_sent: wire.queries_sent,
            responses_received: wire.responses_received,
            errors_received: wire.errors_received,
            timeouts: wire.timeouts,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
        }
    }
}

/// Walks the keyspace looking for nodes and, for a configured set of
/// info-hashes, the peers announcing them. Node and info-hash sets are
/// both bounded; info-hashes explicitly under [`Crawler::monitor`] are
/// never pruned, only opportunistically discovered ones are.
pub struct Crawler {
    node: Arc<DhtNode>,
    config: CrawlerConfig,
    monitored: Mutex<HashSet<InfoHash>>,
    discovered: Mutex<VecDeque<InfoHash>>,
    discovered_nodes: Mutex<VecDeque<NodeID>>,
    stats: Arc<CrawlerStatistics>,
}

impl Crawler {
    pub fn new(node: Arc<DhtNode>, config: CrawlerConfig) -> Crawler {
        let stats = Arc::new(CrawlerStatistics::new(node.transport.clone()));
        Crawler {
            node,
            config,
            monitored: Mutex::new(HashSet::new()),
            discovered: Mutex::new(VecDeque::new()),
            discovered_nodes: Mutex::new(VecDeque::new()),
            stats,
        }
    }

    pub fn stats(&self) -> Arc<CrawlerStatistics> {
        self.stats.clone()
    }

    /// Add `info_hash` to the set this crawler actively tracks peers
    /// for. Monitored hashes survive pruning.
    pub fn monitor(&self, info_hash: InfoHash) {
        self.monitored.lock().unwrap().insert(info_hash);
    }

    /// Spawn the background loops: one draining discovery events off
    /// the node's event bus, one driving periodic lookups.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let event_loop = tokio::spawn(run_event_loop(self.clone()));
        let lookup_loop = tokio::spawn(run_lookup_loop(self.clone()));
        vec![event_loop, lookup_loop]
    }

    /// Record a newly discovered node id, evicting the oldest entry
    /// once the set exceeds `max_nodes`.
    fn remember_node(&self, id: NodeID) {
        let mut nodes = self.discovered_nodes.lock().unwrap();
        if nodes.contains(&id) {
            return;
        }
        nodes.push_back(id);
        while nodes.len() > self.config.max_nodes {
            nodes.pop_front();
        }
    }

    fn remember_info_hash(&self, info_hash: InfoHash) {
        let mut discovered = self.discovered.lock().unwrap();
        if discovered.contains(&info_hash) || self.monitored.lock().unwrap().contains(&info_hash) {
            return;
        }
        discovered.push_back(info_hash);
        self.stats.info_hashes_discovered.fetch_add(1, Ordering::Relaxed);

        while discovered.len() > self.config.max_info_hashes {
            // Never evict a monitored hash: pop the oldest opportunistic
            // one instead by scanning from the front.
            let monitored = self.monitored.lock().unwrap();
            if let Some(pos) = discovered.iter().position(|h| !monitored.contains(h)) {
                discovered.remove(pos);
            } else {
                break;
            }
        }
    }
}

async fn run_event_loop(crawler: Arc<Crawler>) {
    let mut events = crawler.node.events().subscribe();
    loop {
        match events.recv().await {
            Ok(Event::NodeDiscovered { id, .. }) => {
                crawler.stats.nodes_discovered.fetch_add(1, Ordering::Relaxed);
                crawler.remember_node(id);
            }
            Ok(Event::PeerDiscovered { info_hash, .. }) => {
                crawler.stats.peers_discovered.fetch_add(1, Ordering::Relaxed);
                crawler.remember_info_hash(info_hash);
            }
            Ok(Event::InfoHashDiscovered { info_hash }) => {
                crawler.remember_info_hash(info_hash);
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::RecvError::Lagged(skipped)) => {
                log::debug!("crawler event loop lagged, skipped {} events", skipped);
            }
            Err(tokio::sync::broadcast::RecvError::Closed) => return,
        }
    }
}

async fn run_lookup_loop(crawler: Arc<Crawler>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(crawler.config.refresh_interval_secs));
    loop {
        ticker.tick().await;

        // Step 1: discover nodes -- refresh a bounded random subset of
        // already-known nodes by looking up their own id.
        let mut known: Vec<NodeID> = {
            let table = crawler.node.routing_table.lock().unwrap();
            table.all().iter().map(|n| n.id).collect()
        };
        known.shuffle(&mut rand::thread_rng());
        known.truncate(crawler.config.parallel_crawls);
        for id in known {
            crawler.node.lookup_node(id).await;
            crawler.stats.lookups_run.fetch_add(1, Ordering::Relaxed);
        }

        // Step 2: monitor info-hashes. A lookup that turns up at least
        // one peer gets a one-shot follow-up ~follow_up_delay_secs
        // later to pick up further swarm members; lookups that found
        // nothing get no follow-up.
        let monitored: Vec<InfoHash> = crawler
            .monitored
            .lock()
            .unwrap()
            .iter()
            .take(crawler.config.max_concurrent_lookups)
            .copied()
            .collect();
        for info_hash in monitored {
            let result = crawler.node.lookup_peers(info_hash).await;
            crawler.stats.lookups_run.fetch_add(1, Ordering::Relaxed);
            if !result.peers.is_empty() {
                let follow_up = crawler.clone();
                let delay = std::time::Duration::from_secs(crawler.config.follow_up_delay_secs);
                tokio::spawn(async move {
                    tokio::time::delay_for(delay).await;
                    follow_up.node.lookup_peers(info_hash).await;
                    follow_up.stats.lookups_run.fetch_add(1, Ordering::Relaxed);
                });
            }
        }

        // Step 3: opportunistic discovery -- peer lookups against
        // freshly random info-hashes; any that come back with peers
        // are recorded as live.
        for _ in 0..crawler.config.max_random_lookups {
            let target = InfoHash::random();
            let result = crawler.node.lookup_peers(target).await;
            crawler.stats.lookups_run.fetch_add(1, Ordering::Relaxed);
            if !result.peers.is_empty() {
                crawler.remember_info_hash(target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DhtConfig;
    use krpc_encoding::Addr;

    async fn spawn_node() -> Arc<DhtNode> {
        let config = DhtConfig {
            port: 0,
            ..DhtConfig::default()
        };
        let (node, rx) = DhtNode::bind(config, 1800, 1000).await.unwrap();
        node.start(rx);
        node
    }

    #[tokio::test]
    async fn monitor_adds_to_the_tracked_set_and_survives_pruning() {
        let node = spawn_node().await;
        let config = CrawlerConfig {
            max_info_hashes: 1,
            ..CrawlerConfig::default()
        };
        let crawler = Crawler::new(node, config);
        let monitored = InfoHash::random();
        crawler.monitor(monitored);

        for _ in 0..5 {
            crawler.remember_info_hash(InfoHash::random());
        }

        assert!(crawler.monitored.lock().unwrap().contains(&monitored));
    }

    #[tokio::test]
    async fn opportunistic_discoveries_are_bounded_by_max_info_hashes() {
        let node = spawn_node().await;
        let config = CrawlerConfig {
            max_info_hashes: 3,
            ..CrawlerConfig::default()
        };
        let crawler = Crawler::new(node, config);

        for _ in 0..10 {
            crawler.remember_info_hash(InfoHash::random());
        }

        assert!(crawler.discovered.lock().unwrap().len() <= 3);
    }

    #[tokio::test]
    async fn event_loop_updates_stats_on_discovery_events() {
        let node = spawn_node().await;
        let crawler = Arc::new(Crawler::new(node.clone(), CrawlerConfig::default()));
        let handles = crawler.clone().spawn();

        let info_hash = InfoHash::random();
        node.events().publish(Event::PeerDiscovered {
            info_hash,
            endpoint: Addr::new(std::net::Ipv4Addr::new(127, 0, 0, 1), 6881),
        });

        tokio::time::delay_for(std::time::Duration::from_millis(50)).await;
        let stats = crawler.stats().snapshot();
        assert_eq!(stats.peers_discovered, 1);
        assert_eq!(stats.info_hashes_discovered, 1);

        for handle in handles {
            handle.abort();
        }
    }
}
