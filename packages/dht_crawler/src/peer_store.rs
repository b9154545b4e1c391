use chrono::{DateTime, Duration, Utc};
use krpc_encoding::{Addr, InfoHash};
use std::collections::HashMap;
use std::sync::Mutex;

struct Entry {
    peers: HashMap<Addr, DateTime<Utc>>,
}

struct Inner {
    by_hash: HashMap<InfoHash, Entry>,
    ttl: Duration,
    capacity: usize,
    total: usize,
}

/// `InfoHash -> peer set` storage backing `get_peers`/`announce_peer`.
/// Entries expire after `ttl`; the store is bounded in
/// total peer-entry cardinality with oldest-first eviction.
pub struct PeerStore {
    inner: Mutex<Inner>,
}

impl PeerStore {
    pub fn new(ttl_secs: i64, capacity: usize) -> PeerStore {
        PeerStore {
            inner: Mutex::new(Inner {
                by_hash: HashMap::new(),
                ttl: Duration::seconds(ttl_secs),
                capacity,
                total: 0,
            }),
        }
    }

    pub fn insert(&self, info_hash: InfoHash, peer: Addr) {
        let mut inner = self.inner.lock().unwrap();
        inner.evict_expired();

        let is_new = {
            let entry = inner.by_hash.entry(info_hash).or_insert_with(|| Entry {
                peers: HashMap::new(),
            });
            let was_present = entry.peers.contains_key(&peer);
            entry.peers.insert(peer, Utc::now());
            !was_present
        };
        if is_new {
            inner.total += 1;
        }

        inner.evict_over_capacity();
    }

    pub fn get(&self, info_hash: &InfoHash) -> Vec<Addr> {
        let mut inner = self.inner.lock().unwrap();
        inner.evict_expired();
        inner
            .by_hash
            .get(info_hash)
            .map(|entry| entry.peers.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_peers(&self, info_hash: &InfoHash) -> bool {
        !self.get(info_hash).is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().total
    }
}

impl Inner {
    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        let now = Utc::now();
        let mut removed = 0;
        self.by_hash.retain(|_, entry| {
            let before = entry.peers.len();
            entry.peers.retain(|_, inserted_at| now - *inserted_at < ttl);
            removed += before - entry.peers.len();
            !entry.peers.is_empty()
        });
        self.total = self.total.saturating_sub(removed);
    }

    fn evict_over_capacity(&mut self) {
        while self.total > self.capacity {
            let oldest = self
                .by_hash
                .iter()
                .flat_map(|(hash, entry)| entry.peers.iter().map(move |(addr, at)| (*hash, *addr, *at)))
                .min_by_key(|(_, _, at)| *at);

            match oldest {
                Some((hash, addr, _)) => {
                    if let Some(entry) = self.by_hash.get_mut(&hash) {
                        entry.peers.remove(&addr);
                        if entry.peers.is_empty() {
                            self.by_hash.remove(&hash);
                        }
                    }
                    self.total -= 1;
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(port: u16) -> Addr {
        Addr::new(Ipv4Addr::new(127, 0, 0, 1), port)
    }

    #[test]
    fn stores_and_retrieves_peers() {
        let store = PeerStore::new(1800, 1000);
        let hash = InfoHash::random();
        store.insert(hash, addr(1));
        store.insert(hash, addr(2));
        let mut peers = store.get(&hash);
        peers.sort_by_key(|a| a.port());
        assert_eq!(peers, vec![addr(1), addr(2)]);
    }

    #[test]
    fn expires_after_ttl() {
        let store = PeerStore::new(-1, 1000);
        let hash = InfoHash::random();
        store.insert(hash, addr(1));
        assert!(store.get(&hash).is_empty());
    }

    #[test]
    fn evicts_oldest_over_capacity() {
        let store = PeerStore::new(1800, 2);
        let hash = InfoHash::random();
        store.insert(hash, addr(1));
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.insert(hash, addr(2));
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.insert(hash, addr(3));
        let peers = store.get(&hash);
        assert_eq!(peers.len(), 2);
        assert!(!peers.contains(&addr(1)));
    }
}
