use dht_crawler::config::{CrawlerConfig, DhtConfig};
use dht_crawler::crawler::Crawler;
use dht_crawler::node::DhtNode;
use std::path::Path;
use std::sync::Arc;

#[derive(serde_derive::Deserialize)]
struct FileConfig {
    #[serde(default)]
    dht: DhtConfig,
    #[serde(default)]
    crawler: CrawlerConfig,
}

impl Default for FileConfig {
    fn default() -> FileConfig {
        FileConfig {
            dht: DhtConfig::default(),
            crawler: CrawlerConfig::default(),
        }
    }
}

fn load_config(path: &Path) -> FileConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("{} is not valid config JSON ({}), using defaults", path.display(), err);
                FileConfig::default()
            }
        },
        Err(_) => FileConfig::default(),
    }
}

#[tokio::main]
async fn main() -> dht_crawler::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "dht_crawler.json".to_string());
    let file_config = load_config(Path::new(&config_path));

    let (node, inbound_rx) = DhtNode::bind(
        file_config.dht.clone(),
        file_config.crawler.peer_store_ttl_secs,
        file_config.crawler.peer_store_capacity,
    )
    .await?;
    log::info!("listening on {} as {}", node.local_addr(), node.own_id());

    node.start(inbound_rx);

    if let Err(err) = dht_crawler::bootstrap::run(&node, &file_config.dht.bootstrap_nodes).await {
        log::warn!("bootstrap did not complete: {}", err);
    }

    dht_crawler::refresher::spawn(
        node.clone(),
        std::time::Duration::from_secs(file_config.dht.bucket_refresh_interval_secs),
        file_config.dht.bucket_staleness_minutes,
    );

    if file_config.crawler.auto_start {
        let crawler = Arc::new(Crawler::new(node.clone(), file_config.crawler.clone()));
        crawler.clone().spawn();

        let stats = crawler.stats();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                ticker.tick().await;
                let snapshot = stats.snapshot();
                log::info!(
                    "nodes={} peers={} info_hashes={} lookups={} uptime={}s",
                    snapshot.nodes_discovered,
                    snapshot.peers_discovered,
                    snapshot.info_hashes_discovered,
                    snapshot.lookups_run,
                    snapshot.uptime_secs
                );
            }
        });
    }

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    log::info!("shutting down");
    node.stop();
    Ok(())
}
