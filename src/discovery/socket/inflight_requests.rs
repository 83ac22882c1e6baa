use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::discovery::messages::HASH_SIZE;

pub type PacketHash = [u8; HASH_SIZE];

#[derive(Debug, Clone)]
pub struct InflightRequest {
    pub hash: PacketHash,
    pub to: SocketAddr,
    pub sent_at: Instant,
}

impl InflightRequest {
    pub fn does_match(&self, from: &SocketAddr) -> bool {
        if self.to.port() != from.port() {
            return false;
        }

        if self.to.ip().is_unspecified() {
            return true;
        }

        self.to.ip() == from.ip()
    }
}

#[derive(Debug)]
/// Outbound probes waiting for a reply, keyed by packet hash.
pub struct InflightRequests {
    request_timeout: Duration,
    requests: HashMap<PacketHash, InflightRequest>,
    /// Alternate correlation keys pointing at the packet hash.
    aliases: HashMap<PacketHash, PacketHash>,
}

impl InflightRequests {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            requests: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    pub fn add(&mut self, hash: PacketHash, to: SocketAddr, alias: Option<PacketHash>) {
        self.requests.insert(
            hash,
            InflightRequest {
                hash,
                to,
                sent_at: Instant::now(),
            },
        );

        if let Some(alias) = alias {
            self.aliases.insert(alias, hash);
        }
    }

    pub fn contains(&self, hash: &PacketHash) -> bool {
        self.requests.contains_key(hash) || self.aliases.contains_key(hash)
    }

    /// Remove the request matching `key`, either its packet hash or an alias,
    /// if it was sent to `from`.
    pub fn remove(&mut self, key: &PacketHash, from: &SocketAddr) -> Option<InflightRequest> {
        let hash = self.aliases.get(key).copied().unwrap_or(*key);

        if !self.requests.get(&hash)?.does_match(from) {
            return None;
        }

        self.aliases.retain(|_, target| *target != hash);
        self.requests.remove(&hash)
    }

    /// Remove and return all requests older than the request timeout.
    pub fn cleanup(&mut self) -> Vec<InflightRequest> {
        let timeout = self.request_timeout;

        let expired: Vec<PacketHash> = self
            .requests
            .values()
            .filter(|request| request.sent_at.elapsed() >= timeout)
            .map(|request| request.hash)
            .collect();

        if expired.is_empty() {
            return vec![];
        }

        self.aliases.retain(|_, hash| !expired.contains(hash));

        expired
            .iter()
            .filter_map(|hash| self.requests.remove(hash))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn remove_by_hash_or_alias() {
        let mut requests = InflightRequests::new(Duration::from_secs(10));

        requests.add([1; 32], addr(1000), Some([2; 32]));
        requests.add([3; 32], addr(1000), None);

        assert!(requests.contains(&[2; 32]));

        let removed = requests.remove(&[2; 32], &addr(1000)).unwrap();
        assert_eq!(removed.hash, [1; 32]);
        assert!(!requests.contains(&[1; 32]));
        assert!(!requests.contains(&[2; 32]));

        assert!(requests.remove(&[3; 32], &addr(1000)).is_some());
        assert!(requests.is_empty());
    }

    #[test]
    fn wrong_address() {
        let mut requests = InflightRequests::new(Duration::from_secs(10));

        requests.add([1; 32], addr(1000), None);

        assert!(requests.remove(&[1; 32], &addr(1001)).is_none());
        assert!(requests
            .remove(&[1; 32], &SocketAddr::from(([10, 0, 0, 1], 1000)))
            .is_none());
        assert!(requests.contains(&[1; 32]));
    }

    #[test]
    fn unspecified_ip_matches_any() {
        let request = InflightRequest {
            hash: [0; 32],
            to: SocketAddr::from(([0, 0, 0, 0], 1000)),
            sent_at: Instant::now(),
        };

        assert!(request.does_match(&addr(1000)));
        assert!(!request.does_match(&addr(1001)));
    }

    #[test]
    fn cleanup() {
        let mut requests = InflightRequests::new(Duration::from_millis(10));

        requests.add([1; 32], addr(1000), Some([2; 32]));
        assert!(requests.cleanup().is_empty());

        thread::sleep(Duration::from_millis(20));
        requests.add([3; 32], addr(1000), None);

        let expired = requests.cleanup();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].hash, [1; 32]);

        assert!(!requests.contains(&[2; 32]));
        assert_eq!(requests.len(), 1);
    }
}
