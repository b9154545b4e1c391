use serde_derive::{Deserialize, Serialize};

/// Configuration consumed by [`crate::node::DhtNode`]. The JSON-backed
/// config store that owns a file on disk is an
/// external collaborator; this struct only needs to round-trip
/// through `serde_json` for that collaborator to load it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DhtConfig {
    pub port: u16,
    pub k_bucket_size: usize,
    pub alpha: usize,
    pub max_results: usize,
    pub bootstrap_nodes: Vec<String>,
    pub token_rotation_interval_secs: i64,
    pub bucket_refresh_interval_secs: u64,
    pub bucket_staleness_minutes: i64,
    pub transaction_timeout_secs: u64,
    pub max_transactions: usize,
    pub verifier_settle_delay_secs: u64,
    pub verifier_queue_capacity: usize,
    pub verifier_cache_ttl_secs: i64,
    pub lookup_iteration_cap: usize,
    pub lookup_total_queried_cap: usize,
}

impl Default for DhtConfig {
    fn default() -> DhtConfig {
        DhtConfig {
            port: 6881,
            k_bucket_size: 16,
            alpha: 3,
            max_results: 8,
            bootstrap_nodes: vec![
                "router.bittorrent.com:6881".to_string(),
                "dht.transmissionbt.com:6881".to_string(),
                "router.utorrent.com:6881".to_string(),
            ],
            token_rotation_interval_secs: 300,
            bucket_refresh_interval_secs: 60,
            bucket_staleness_minutes: 15,
            transaction_timeout_secs: 30,
            max_transactions: 1024,
            verifier_settle_delay_secs: 5,
            verifier_queue_capacity: 4096,
            verifier_cache_ttl_secs: 3600,
            lookup_iteration_cap: 10,
            lookup_total_queried_cap: 100,
        }
    }
}

/// Crawler-specific knobs layered on top of [`DhtConfig`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub parallel_crawls: usize,
    pub refresh_interval_secs: u64,
    pub max_nodes: usize,
    pub max_info_hashes: usize,
    pub max_concurrent_lookups: usize,
    pub max_random_lookups: usize,
    pub follow_up_delay_secs: u64,
    pub auto_start: bool,
    pub peer_store_ttl_secs: i64,
    pub peer_store_capacity: usize,
}

impl Default for CrawlerConfig {
    fn default() -> CrawlerConfig {
        CrawlerConfig {
            parallel_crawls: 10,
            refresh_interval_secs: 60,
            max_nodes: 50_000,
            max_info_hashes: 10_000,
            max_concurrent_lookups: 5,
            max_random_lookups: 2,
            follow_up_delay_secs: 5,
            auto_start: true,
            peer_store_ttl_secs: 1800,
            peer_store_capacity: 50_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DhtConfig::default();
        assert_eq!(config.port, 6881);
        assert_eq!(config.k_bucket_size, 16);
        assert_eq!(config.alpha, 3);
        assert_eq!(config.max_results, 8);
        assert_eq!(config.token_rotation_interval_secs, 300);
        assert_eq!(config.bucket_refresh_interval_secs, 60);
        assert_eq!(config.transaction_timeout_secs, 30);
        assert_eq!(config.max_transactions, 1024);
    }

    #[test]
    fn round_trips_through_json() {
        let config = CrawlerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: CrawlerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.parallel_crawls, config.parallel_crawls);
    }
}
