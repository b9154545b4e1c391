use crate::errors::{Error, ErrorKind, Result};
use crate::node::DhtNode;
use krpc_encoding::{Addr, NodeID};
use routing_table::Node;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

/// Resolve the configured bootstrap hosts, seed the routing table with
/// a placeholder-id `Node` for each resolved endpoint (its real id is
/// unknown ahead of time, and these are low-value entries that will be
/// corrected or evicted as real communication ensues), ping each one,
/// then run a node lookup for our own id to pull in everything those
/// hosts know about the neighborhood around us.
pub async fn run(node: &Arc<DhtNode>, hosts: &[String]) -> Result<()> {
    let mut reached = 0;
    for host in hosts {
        match resolve(host) {
            Ok(addr) => {
                node.routing_table
                    .lock()
                    .unwrap()
                    .add(Node::new(NodeID::random(), addr));
                if node.ping(addr).await.is_ok() {
                    reached += 1;
                }
            }
            Err(err) => {
                log::warn!("bootstrap host {} did not resolve: {}", host, err);
            }
        }
    }

    if reached == 0 {
        return Err(Error::from(ErrorKind::BootstrapFailed));
    }

    let own_id = node.own_id();
    node.lookup_node(own_id).await;
    Ok(())
}

fn resolve(host: &str) -> Result<Addr> {
    let addr: SocketAddr = host
        .to_socket_addrs()
        .map_err(|_| Error::from(ErrorKind::InvalidArgument {
            reason: format!("could not resolve {}", host),
        }))?
        .find(|a| a.is_ipv4())
        .ok_or_else(|| Error::from(ErrorKind::InvalidArgument {
            reason: format!("{} has no IPv4 address", host),
        }))?;

    match addr {
        SocketAddr::V4(v4) => Ok(Addr::from(v4)),
        SocketAddr::V6(_) => unreachable!("filtered to IPv4 above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DhtConfig;

    #[test]
    fn resolve_rejects_unresolvable_host() {
        let err = resolve("this-host-does-not-resolve.invalid:6881");
        assert!(err.is_err());
    }

    #[test]
    fn resolve_accepts_loopback() {
        let addr = resolve("127.0.0.1:6881").unwrap();
        assert_eq!(addr.port(), 6881);
    }

    #[tokio::test]
    async fn fails_when_no_host_responds() {
        let config = DhtConfig {
            port: 0,
            transaction_timeout_secs: 1,
            ..DhtConfig::default()
        };
        let (node, _inbound_rx) = DhtNode::bind(config, 1800, 1000).await.unwrap();
        // Port 1 is reserved and nothing answers KRPC there.
        let hosts = vec!["127.0.0.1:1".to_string()];
        let result = run(&node, &hosts).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn succeeds_when_a_host_responds() {
        let seed_config = DhtConfig {
            port: 0,
            ..DhtConfig::default()
        };
        let (seed, seed_rx) = DhtNode::bind(seed_config, 1800, 1000).await.unwrap();
        seed.start(seed_rx);

        let config = DhtConfig {
            port: 0,
            transaction_timeout_secs: 2,
            verifier_settle_delay_secs: 0,
            ..DhtConfig::default()
        };
        let (node, _inbound_rx) = DhtNode::bind(config, 1800, 1000).await.unwrap();
        let hosts = vec![seed.local_addr().to_string()];
        let result = run(&node, &hosts).await;
        assert!(result.is_ok());
    }
}
