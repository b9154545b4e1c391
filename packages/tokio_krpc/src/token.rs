use chrono::{DateTime, Utc};
use rand::RngCore;
use std::net::SocketAddr;
use std::sync::Mutex;

const SECRET_LEN: usize = 20;

/// Rotating HMAC-style token grant protecting `announce_peer`: a token
/// minted for an endpoint from the current secret still verifies
/// against the previous secret for one rotation afterwards.
pub struct TokenManager {
    state: Mutex<State>,
    rotation_interval: chrono::Duration,
}

struct State {
    current: [u8; SECRET_LEN],
    previous: [u8; SECRET_LEN],
    last_rotation: DateTime<Utc>,
}

impl TokenManager {
    pub fn new(rotation_interval_secs: i64) -> TokenManager {
        TokenManager {
            state: Mutex::new(State {
                current: random_secret(),
                previous: random_secret(),
                last_rotation: Utc::now(),
            }),
            rotation_interval: chrono::Duration::seconds(rotation_interval_secs),
        }
    }

    /// Rotate if `rotation_interval` has elapsed since the last
    /// rotation. Called from a periodic tick owned by `DhtNode`.
    pub fn maybe_rotate(&self) {
        let mut state = self.state.lock().unwrap();
        if Utc::now() - state.last_rotation >= self.rotation_interval {
            state.previous = state.current;
            state.current = random_secret();
            state.last_rotation = Utc::now();
        }
    }

    pub fn generate(&self, endpoint: SocketAddr) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        token_for(endpoint, &state.current)
    }

    pub fn verify(&self, token: &[u8], endpoint: SocketAddr) -> bool {
        let state = self.state.lock().unwrap();
        token == token_for(endpoint, &state.current).as_slice()
            || token == token_for(endpoint, &state.previous).as_slice()
    }
}

fn random_secret() -> [u8; SECRET_LEN] {
    let mut secret = [0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

fn token_for(endpoint: SocketAddr, secret: &[u8; SECRET_LEN]) -> Vec<u8> {
    let mut hasher = sha1::Sha1::new();
    hasher.update(endpoint.to_string().as_bytes());
    hasher.update(secret);
    hasher.digest().bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ep(port: u16) -> SocketAddr {
        SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn round_trips_against_current_secret() {
        let manager = TokenManager::new(300);
        let token = manager.generate(ep(6881));
        assert!(manager.verify(&token, ep(6881)));
    }

    #[test]
    fn rejects_unrelated_endpoint() {
        let manager = TokenManager::new(300);
        let token = manager.generate(ep(6881));
        assert!(!manager.verify(&token, ep(6882)));
    }

    #[test]
    fn survives_one_rotation() {
        let manager = TokenManager::new(-1); // force maybe_rotate to always fire
        let token = manager.generate(ep(6881));
        manager.maybe_rotate();
        assert!(manager.verify(&token, ep(6881)));
    }

    #[test]
    fn fails_two_rotations_later() {
        let manager = TokenManager::new(-1);
        let token = manager.generate(ep(6881));
        manager.maybe_rotate();
        manager.maybe_rotate();
        assert!(!manager.verify(&token, ep(6881)));
    }
}
