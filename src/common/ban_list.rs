//! Time bounded denylist of misbehaving or unresponsive peers.

use std::{
    num::NonZeroUsize,
    time::{Duration, Instant},
};

use lru::LruCache;
use tracing::debug;

use crate::common::{Contact, Endpoint, Id};

/// Maximum number of ban entries before the least recently touched are dropped.
pub const MAX_BANNED: usize = 30_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BanKey {
    Node(Id),
    /// `address:udpPort`
    Endpoint(String),
}

#[derive(Debug)]
/// Bans peers by routing id and by endpoint, each entry expiring on its own.
pub struct BanList {
    entries: LruCache<BanKey, Instant>,
}

impl BanList {
    pub fn new() -> Self {
        Self::with_capacity(MAX_BANNED)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    // === Public Methods ===

    /// Ban both the id and the endpoint of a contact.
    pub fn ban_contact(&mut self, contact: &Contact, duration: Duration) {
        debug!(id = ?contact.id(), endpoint = %contact.endpoint, ?duration, "Banning peer");

        self.insert(BanKey::Node(*contact.id()), duration);
        self.insert(BanKey::Endpoint(contact.endpoint.key()), duration);
    }

    /// Ban an endpoint whose identity is not (yet) known.
    pub fn ban_endpoint(&mut self, endpoint: &Endpoint, duration: Duration) {
        debug!(%endpoint, ?duration, "Banning endpoint");

        self.insert(BanKey::Endpoint(endpoint.key()), duration);
    }

    /// Returns `true` if either the id or the endpoint of this contact is banned.
    pub fn is_contact_banned(&mut self, contact: &Contact) -> bool {
        // Evaluate both to purge both expired entries.
        let node = self.check(&BanKey::Node(*contact.id()));
        let endpoint = self.check(&BanKey::Endpoint(contact.endpoint.key()));

        node || endpoint
    }

    pub fn is_id_banned(&mut self, id: &Id) -> bool {
        self.check(&BanKey::Node(*id))
    }

    pub fn is_endpoint_banned(&mut self, endpoint: &Endpoint) -> bool {
        self.check(&BanKey::Endpoint(endpoint.key()))
    }

    /// When the ban on this endpoint lifts, if it is banned.
    pub fn endpoint_banned_until(&self, endpoint: &Endpoint) -> Option<Instant> {
        self.entries
            .peek(&BanKey::Endpoint(endpoint.key()))
            .copied()
            .filter(|expiry| *expiry > Instant::now())
    }

    /// Number of entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // === Private Methods ===

    fn insert(&mut self, key: BanKey, duration: Duration) {
        self.entries.put(key, Instant::now() + duration);
    }

    /// Lazily purges the entry if it expired.
    fn check(&mut self, key: &BanKey) -> bool {
        match self.entries.peek(key) {
            Some(expiry) if *expiry > Instant::now() => true,
            Some(_) => {
                self.entries.pop(key);
                false
            }
            None => false,
        }
    }
}

impl Default for BanList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use crate::common::NodeId;

    use super::*;

    fn contact() -> Contact {
        Contact::new(
            NodeId::random(),
            Endpoint::new([127, 0, 0, 1].into(), Some(30303), Some(30303)),
        )
    }

    #[test]
    fn ban_contact() {
        let mut ban_list = BanList::new();
        let contact = contact();

        assert!(!ban_list.is_contact_banned(&contact));

        ban_list.ban_contact(&contact, Duration::from_secs(60));

        assert!(ban_list.is_contact_banned(&contact));
        assert!(ban_list.is_id_banned(contact.id()));
        assert!(ban_list.is_endpoint_banned(&contact.endpoint));

        // Same endpoint, different identity.
        let other = Contact::new(NodeId::random(), contact.endpoint);
        assert!(ban_list.is_contact_banned(&other));
        assert!(!ban_list.is_id_banned(other.id()));
    }

    #[test]
    fn ban_endpoint() {
        let mut ban_list = BanList::new();
        let contact = contact();

        ban_list.ban_endpoint(&contact.endpoint, Duration::from_secs(60));

        assert!(ban_list.is_endpoint_banned(&contact.endpoint));
        assert!(!ban_list.is_id_banned(contact.id()));

        let until = ban_list.endpoint_banned_until(&contact.endpoint).unwrap();
        assert!(until <= Instant::now() + Duration::from_secs(60));
        assert!(until > Instant::now() + Duration::from_secs(59));
    }

    #[test]
    fn expired_entries_are_purged() {
        let mut ban_list = BanList::new();
        let contact = contact();

        ban_list.ban_contact(&contact, Duration::from_millis(10));
        assert_eq!(ban_list.len(), 2);

        thread::sleep(Duration::from_millis(20));

        assert!(!ban_list.is_contact_banned(&contact));
        assert!(ban_list.is_empty());
    }

    #[test]
    fn bounded() {
        let mut ban_list = BanList::with_capacity(2);

        for _ in 0..3 {
            ban_list.ban_contact(&contact(), Duration::from_secs(60));
        }

        assert_eq!(ban_list.len(), 2);
    }
}
