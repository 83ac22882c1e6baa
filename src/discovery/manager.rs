//! Discovery manager (DPT): keeps the routing table populated with live peers.

use std::{
    collections::HashMap,
    net::SocketAddr,
    time::{Duration, Instant},
};

use flume::Sender;
use secp256k1::SecretKey;
use tracing::{debug, info, trace};

use crate::common::{AddOutcome, BanList, Contact, Endpoint, Id, NodeId, RoutingTable};

use super::config::Config;
use super::messages::PeerRecord;
use super::server::{DiscoveryServer, ProbeError, ProbeStatus, ServerEvent};

/// Ban applied to an endpoint that failed to answer an `add_peer` probe.
pub const UNRESPONSIVE_BAN: Duration = Duration::from_secs(10 * 60);
/// Ban applied to eviction losers, either the dead incumbent or the rejected newcomer.
pub const EVICTION_BAN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
/// Notifications about the routing table and discovery activity.
pub enum DptEvent {
    /// A contact was inserted into the routing table.
    PeerAdded(Contact),
    /// A contact was removed from the routing table.
    PeerRemoved(Contact),
    /// A previously unknown peer answered a liveness probe.
    PeerNew(Contact),
    /// A bootstrap attempt failed.
    Error(DptError),
}

pub type AddPeerSender = Sender<Result<Contact, DptError>>;

#[derive(Debug)]
struct AddPeerWaiter {
    reply: Option<AddPeerSender>,
    bootstrap: bool,
    /// Identity advertised for the endpoint by a neighbors record.
    node_id: Option<NodeId>,
}

#[derive(Debug)]
enum Waiter {
    AddPeer {
        endpoint: Endpoint,
        waiter: AddPeerWaiter,
    },
    Eviction {
        round: u64,
        incumbent: Contact,
    },
}

#[derive(Debug)]
struct EvictionRound {
    candidate: Contact,
    remaining: usize,
    any_failed: bool,
}

#[derive(Debug, Clone)]
/// Information and statistics about a discovery node.
pub struct Info {
    node_id: NodeId,
    local_addr: SocketAddr,
    endpoint: Endpoint,
    peers: usize,
}

impl Info {
    /// This node's identity.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Local UDP Ipv4 socket address that this node is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint advertised in liveness probes.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Number of contacts in the routing table.
    pub fn peers(&self) -> usize {
        self.peers
    }
}

#[derive(Debug)]
/// Orchestrates the [DiscoveryServer], the [RoutingTable] and the [BanList].
///
/// Single threaded and driven by [DiscoveryManager::tick].
pub struct DiscoveryManager {
    server: DiscoveryServer,
    routing_table: RoutingTable,
    ban_list: BanList,
    /// `address:udpPort` of every contact in the routing table.
    endpoints: HashMap<String, Id>,
    /// Callers waiting on a liveness probe, keyed by `address:udpPort`.
    waiters: HashMap<String, Vec<Waiter>>,
    eviction_rounds: HashMap<u64, EvictionRound>,
    next_round: u64,
    refresh_interval: Duration,
    last_refresh: Instant,
    events: Vec<DptEvent>,
}

impl DiscoveryManager {
    pub fn new(config: Config) -> Result<Self, std::io::Error> {
        let secret_key = config
            .secret_key
            .unwrap_or_else(|| SecretKey::new(&mut rand::thread_rng()));

        let server = DiscoveryServer::new(&config, secret_key)?;

        let routing_table = RoutingTable::new(server.node_id().id())
            .with_bucket_size(config.bucket_size)
            .with_ping_count(config.ping_count);

        info!(address = ?server.local_addr(), node_id = %server.node_id(), "DPT listening");

        let mut manager = Self {
            server,
            routing_table,
            ban_list: BanList::new(),
            endpoints: HashMap::new(),
            waiters: HashMap::new(),
            eviction_rounds: HashMap::new(),
            next_round: 0,
            refresh_interval: config.refresh_interval,
            last_refresh: Instant::now(),
            events: vec![],
        };

        for endpoint in config.bootstrap {
            manager.bootstrap(endpoint, None);
        }

        Ok(manager)
    }

    // === Getters ===

    pub fn node_id(&self) -> &NodeId {
        self.server.node_id()
    }

    /// Returns the address the server is listening to.
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    pub fn info(&self) -> Info {
        Info {
            node_id: *self.node_id(),
            local_addr: self.local_addr(),
            endpoint: *self.server.endpoint(),
            peers: self.routing_table.count(),
        }
    }

    /// Returns the known contact with this id.
    pub fn get_peer(&self, id: &Id) -> Option<Contact> {
        self.routing_table.get(id)
    }

    pub fn peers(&self) -> Vec<Contact> {
        self.routing_table.to_vec()
    }

    /// Known contacts closest to `id`, at most a bucket worth.
    pub fn closest_peers(&self, id: &Id) -> Vec<Contact> {
        self.routing_table
            .closest(id, self.routing_table.bucket_size())
    }

    // === Public Methods ===

    /// Add the peer at `endpoint`, then ask it for the nodes closest to us.
    pub fn bootstrap(&mut self, endpoint: Endpoint, reply: Option<AddPeerSender>) {
        debug!(%endpoint, "Bootstrapping");

        self.add(endpoint, None, reply, true);
    }

    /// Add the peer at `endpoint` if it answers a liveness probe.
    ///
    /// The result is sent to `reply` once known, which may be immediately.
    pub fn add_peer(&mut self, endpoint: Endpoint, reply: Option<AddPeerSender>) {
        self.add(endpoint, None, reply, false);
    }

    /// Ban a contact's id and endpoint for `duration` and remove it from the routing table.
    pub fn ban_peer(&mut self, contact: &Contact, duration: Duration) {
        self.ban_list.ban_contact(contact, duration);
        self.remove_peer(contact.id());
    }

    pub fn remove_peer(&mut self, id: &Id) -> Option<Contact> {
        let removed = self.routing_table.remove(id)?;
        self.forget_endpoint(&removed);

        self.events.push(DptEvent::PeerRemoved(removed.clone()));

        Some(removed)
    }

    /// Ask every known peer for the nodes closest to a random target.
    pub fn refresh(&mut self) {
        let peers = self.routing_table.to_vec();
        debug!(peers = peers.len(), "Refreshing routing table");

        for peer in peers {
            self.server.find_node(&peer.endpoint, NodeId::random());
        }

        self.last_refresh = Instant::now();
    }

    /// Run the periodic refresh, drive the server, and return the events since last tick.
    pub fn tick(&mut self) -> Vec<DptEvent> {
        if self.last_refresh.elapsed() >= self.refresh_interval {
            self.refresh();
        }

        for event in self.server.tick(&self.routing_table) {
            match event {
                ServerEvent::ProbeSettled { key, result } => self.on_probe_settled(key, result),
                ServerEvent::PeersDiscovered(peers) => self.on_peers_discovered(peers),
            }
        }

        std::mem::take(&mut self.events)
    }

    // === Private Methods ===

    fn add(
        &mut self,
        endpoint: Endpoint,
        node_id: Option<NodeId>,
        reply: Option<AddPeerSender>,
        bootstrap: bool,
    ) {
        let banned = self.ban_list.is_endpoint_banned(&endpoint)
            || node_id.is_some_and(|node_id| self.ban_list.is_id_banned(&node_id.id()));

        if banned {
            trace!(%endpoint, "Refusing to add a banned peer");
            respond(reply, Err(DptError::Banned));
            return;
        }

        if let Some(contact) = self.find_known(&endpoint, node_id) {
            if bootstrap {
                self.server.find_node(&contact.endpoint, *self.node_id());
            }
            respond(reply, Ok(contact));
            return;
        }

        let waiter = AddPeerWaiter {
            reply,
            bootstrap,
            node_id,
        };

        match self.server.hey(&endpoint) {
            ProbeStatus::Done(result) => self.settle_add_peers(&endpoint, result, vec![waiter]),
            ProbeStatus::Pending(key) => self
                .waiters
                .entry(key)
                .or_default()
                .push(Waiter::AddPeer { endpoint, waiter }),
        }
    }

    fn find_known(&self, endpoint: &Endpoint, node_id: Option<NodeId>) -> Option<Contact> {
        if let Some(node_id) = node_id {
            return self.routing_table.get(&node_id.id());
        }

        self.endpoints
            .get(&endpoint.key())
            .and_then(|id| self.routing_table.get(id))
    }

    fn forget_endpoint(&mut self, contact: &Contact) {
        let key = contact.endpoint.key();

        if self.endpoints.get(&key) == Some(contact.id()) {
            self.endpoints.remove(&key);
        }
    }

    fn on_probe_settled(&mut self, key: String, result: Result<Contact, ProbeError>) {
        let Some(waiters) = self.waiters.remove(&key) else {
            return;
        };

        let mut add_peers = vec![];
        let mut endpoint = None;

        for waiter in waiters {
            match waiter {
                Waiter::Eviction { round, incumbent } => {
                    self.on_eviction_probe(round, incumbent, result.is_ok())
                }
                Waiter::AddPeer {
                    endpoint: probed,
                    waiter,
                } => {
                    endpoint = Some(probed);
                    add_peers.push(waiter);
                }
            }
        }

        if let Some(endpoint) = endpoint {
            self.settle_add_peers(&endpoint, result, add_peers);
        }
    }

    fn settle_add_peers(
        &mut self,
        endpoint: &Endpoint,
        result: Result<Contact, ProbeError>,
        waiters: Vec<AddPeerWaiter>,
    ) {
        match result {
            Ok(contact) => {
                debug!(%endpoint, node_id = ?contact.node_id(), "Peer is alive");

                let (waiters, impostors): (Vec<_>, Vec<_>) =
                    waiters.into_iter().partition(|waiter| {
                        waiter
                            .node_id
                            .map_or(true, |node_id| &node_id == contact.node_id())
                    });

                for waiter in impostors {
                    let Some(expected) = waiter.node_id else {
                        continue;
                    };
                    debug!(%endpoint, ?expected, found = ?contact.node_id(), "Peer answered with another identity");

                    respond(
                        waiter.reply,
                        Err(DptError::UnexpectedIdentity {
                            expected,
                            found: *contact.node_id(),
                        }),
                    );
                }

                if waiters.is_empty() {
                    return;
                }

                self.events.push(DptEvent::PeerNew(contact.clone()));
                self.insert(contact.clone());

                for waiter in waiters {
                    if waiter.bootstrap {
                        self.server.find_node(&contact.endpoint, *self.node_id());
                    }
                    respond(waiter.reply, Ok(contact.clone()));
                }
            }
            Err(error) => {
                debug!(%endpoint, ?error, "Failed to add peer");

                self.ban_list.ban_endpoint(endpoint, UNRESPONSIVE_BAN);

                for waiter in waiters {
                    let error = DptError::Probe(error.clone());

                    match waiter.reply {
                        Some(reply) => {
                            let _ = reply.send(Err(error));
                        }
                        None if waiter.bootstrap => self.events.push(DptEvent::Error(error)),
                        None => {}
                    }
                }
            }
        }
    }

    /// Insert into the routing table, starting an eviction round if the bucket is full.
    fn insert(&mut self, contact: Contact) {
        match self.routing_table.add(contact.clone()) {
            AddOutcome::Added => {
                self.endpoints
                    .insert(contact.endpoint.key(), *contact.id());
                self.events.push(DptEvent::PeerAdded(contact));
            }
            AddOutcome::Updated { previous } => {
                self.forget_endpoint(&previous);
                self.endpoints
                    .insert(contact.endpoint.key(), *contact.id());
            }
            AddOutcome::Unchanged => {}
            AddOutcome::Ping { oldest, candidate } => self.start_eviction(oldest, candidate),
        }
    }

    fn start_eviction(&mut self, incumbents: Vec<Contact>, candidate: Contact) {
        if self.ban_list.is_contact_banned(&candidate) || incumbents.is_empty() {
            return;
        }

        let round = self.next_round;
        self.next_round = self.next_round.wrapping_add(1);

        trace!(round, candidate = ?candidate.id(), incumbents = incumbents.len(), "Eviction round");

        self.eviction_rounds.insert(
            round,
            EvictionRound {
                candidate,
                remaining: incumbents.len(),
                any_failed: false,
            },
        );

        for incumbent in incumbents {
            match self.server.hey(&incumbent.endpoint) {
                ProbeStatus::Done(result) => {
                    self.on_eviction_probe(round, incumbent, result.is_ok())
                }
                ProbeStatus::Pending(key) => self
                    .waiters
                    .entry(key)
                    .or_default()
                    .push(Waiter::Eviction { round, incumbent }),
            }
        }
    }

    fn on_eviction_probe(&mut self, round_id: u64, incumbent: Contact, alive: bool) {
        if !alive {
            debug!(id = ?incumbent.id(), "Evicting unresponsive peer");
            self.ban_peer(&incumbent, EVICTION_BAN);
        }

        let Some(round) = self.eviction_rounds.get_mut(&round_id) else {
            return;
        };

        round.any_failed |= !alive;
        round.remaining = round.remaining.saturating_sub(1);

        if round.remaining > 0 {
            return;
        }

        if let Some(round) = self.eviction_rounds.remove(&round_id) {
            if round.any_failed {
                self.insert(round.candidate);
            } else {
                self.ban_list.ban_contact(&round.candidate, EVICTION_BAN);
            }
        }
    }

    fn on_peers_discovered(&mut self, peers: Vec<PeerRecord>) {
        for peer in peers {
            if peer.endpoint.udp_port.is_none() || &peer.node_id == self.node_id() {
                continue;
            }

            self.add(peer.endpoint, Some(peer.node_id), None, false);
        }
    }
}

fn respond(reply: Option<AddPeerSender>, result: Result<Contact, DptError>) {
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}

#[derive(thiserror::Error, Debug, Clone)]
/// Errors adding a peer.
pub enum DptError {
    #[error("Peer is banned")]
    Banned,

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("Peer answered as {found}, while {expected} was advertised for its endpoint")]
    /// A neighbors record advertised an identity the endpoint doesn't hold.
    UnexpectedIdentity { expected: NodeId, found: NodeId },

    #[error(transparent)]
    /// The [crate::Dpt] actor thread is no longer running.
    Shutdown(#[from] crate::dpt::DptWasShutdown),
}

#[cfg(test)]
mod test {
    use std::net::UdpSocket;

    use flume::Receiver;
    use secp256k1::Secp256k1;

    use super::*;

    fn manager(config: Config) -> DiscoveryManager {
        DiscoveryManager::new(config).unwrap()
    }

    fn loopback(manager: &DiscoveryManager) -> Endpoint {
        Endpoint::new(
            [127, 0, 0, 1].into(),
            Some(manager.local_addr().port()),
            None,
        )
    }

    /// Secret key whose routing id lands in the half opposite to `local`.
    fn far_key(local: &Id) -> SecretKey {
        let secp = Secp256k1::new();

        loop {
            let secret_key = SecretKey::new(&mut rand::thread_rng());
            let id = NodeId::from(secret_key.public_key(&secp)).id();

            if id.bit(0) != local.bit(0) {
                return secret_key;
            }
        }
    }

    /// Tick all managers until `receiver` yields, collecting the first manager's events.
    fn wait(
        managers: &mut [&mut DiscoveryManager],
        receiver: &Receiver<Result<Contact, DptError>>,
        events: &mut Vec<DptEvent>,
    ) -> Result<Contact, DptError> {
        let start = Instant::now();

        while start.elapsed() < Duration::from_secs(5) {
            for (i, manager) in managers.iter_mut().enumerate() {
                let new_events = manager.tick();
                if i == 0 {
                    events.extend(new_events);
                }
            }

            if let Ok(result) = receiver.try_recv() {
                return result;
            }
        }

        panic!("timed out waiting for add_peer")
    }

    fn tick_all(managers: &mut [&mut DiscoveryManager], duration: Duration, events: &mut Vec<DptEvent>) {
        let start = Instant::now();

        while start.elapsed() < duration {
            for (i, manager) in managers.iter_mut().enumerate() {
                let new_events = manager.tick();
                if i == 0 {
                    events.extend(new_events);
                }
            }
        }
    }

    #[test]
    fn add_peer() {
        let mut a = manager(Config::default());
        let mut b = manager(Config::default());

        let (sender, receiver) = flume::bounded(1);
        a.add_peer(loopback(&b), Some(sender));

        let mut events = vec![];
        let contact = wait(&mut [&mut a, &mut b], &receiver, &mut events).unwrap();

        assert_eq!(contact.node_id(), b.node_id());
        assert_eq!(a.get_peer(contact.id()), Some(contact.clone()));
        assert!(events
            .iter()
            .any(|e| matches!(e, DptEvent::PeerNew(c) if c == &contact)));
        assert!(events
            .iter()
            .any(|e| matches!(e, DptEvent::PeerAdded(c) if c == &contact)));

        // Known peers are answered from the routing table.
        let (sender, receiver) = flume::bounded(1);
        a.add_peer(loopback(&b), Some(sender));
        assert_eq!(receiver.try_recv().unwrap().unwrap(), contact);
    }

    #[test]
    fn banned_peer() {
        let mut a = manager(Config::default());
        let endpoint = Endpoint::new([127, 0, 0, 1].into(), Some(1), None);

        a.ban_list.ban_endpoint(&endpoint, Duration::from_secs(60));

        let (sender, receiver) = flume::bounded(1);
        a.add_peer(endpoint, Some(sender));

        assert!(matches!(receiver.try_recv(), Ok(Err(DptError::Banned))));
        assert!(a.waiters.is_empty());
    }

    #[test]
    fn unresponsive_peer_is_banned() {
        let mut a = manager(Config {
            request_timeout: Duration::from_millis(50),
            ..Default::default()
        });

        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::new(
            [127, 0, 0, 1].into(),
            Some(silent.local_addr().unwrap().port()),
            None,
        );

        let (sender, receiver) = flume::bounded(1);
        let before = Instant::now();
        a.add_peer(endpoint, Some(sender));

        let result = wait(&mut [&mut a], &receiver, &mut vec![]);
        assert!(matches!(
            result,
            Err(DptError::Probe(ProbeError::Timeout))
        ));

        let until = a.ban_list.endpoint_banned_until(&endpoint).unwrap();
        assert!(until >= before + UNRESPONSIVE_BAN);
        assert!(until <= Instant::now() + UNRESPONSIVE_BAN);

        let (sender, receiver) = flume::bounded(1);
        a.add_peer(endpoint, Some(sender));
        assert!(matches!(receiver.try_recv(), Ok(Err(DptError::Banned))));
    }

    #[test]
    fn advertised_identity_must_answer() {
        let mut a = manager(Config::default());
        let mut b = manager(Config::default());

        // A neighbors record pairing B's endpoint with another identity.
        let (sender, receiver) = flume::bounded(1);
        a.add(loopback(&b), Some(NodeId::random()), Some(sender), false);

        let result = wait(&mut [&mut a, &mut b], &receiver, &mut vec![]);

        match result {
            Err(DptError::UnexpectedIdentity { found, .. }) => assert_eq!(&found, b.node_id()),
            result => panic!("unexpected {result:?}"),
        }
        assert!(a.get_peer(&b.node_id().id()).is_none());

        // The right identity is accepted, from the cached probe.
        let (sender, receiver) = flume::bounded(1);
        a.add(loopback(&b), Some(*b.node_id()), Some(sender), false);

        let contact = receiver.try_recv().unwrap().unwrap();
        assert_eq!(contact.node_id(), b.node_id());
        assert!(a.get_peer(&b.node_id().id()).is_some());
    }

    #[test]
    fn known_endpoints() {
        let mut a = manager(Config::default());
        let node_id = NodeId::random();
        let first = Endpoint::new([10, 0, 0, 1].into(), Some(30303), None);
        let second = Endpoint::new([10, 0, 0, 2].into(), Some(30303), None);

        a.insert(Contact::new(node_id, first));
        assert_eq!(
            a.find_known(&first, None).map(|c| *c.node_id()),
            Some(node_id)
        );

        // Moved to another endpoint.
        a.insert(Contact::new(node_id, second).with_clock(1));
        assert!(a.find_known(&first, None).is_none());
        assert_eq!(a.find_known(&second, None).unwrap().endpoint, second);

        a.remove_peer(&node_id.id());
        assert!(a.find_known(&second, None).is_none());
        assert!(a.endpoints.is_empty());
    }

    #[test]
    fn bootstrap() {
        let mut a = manager(Config::default());
        let mut b = manager(Config::default());
        let mut c = manager(Config::default());

        // B knows C
        let (sender, receiver) = flume::bounded(1);
        b.add_peer(loopback(&c), Some(sender));
        wait(&mut [&mut b, &mut c], &receiver, &mut vec![]).unwrap();

        let (sender, receiver) = flume::bounded(1);
        a.bootstrap(loopback(&b), Some(sender));

        let mut events = vec![];
        wait(&mut [&mut a, &mut b, &mut c], &receiver, &mut events).unwrap();

        let c_id = c.node_id().id();
        let start = Instant::now();
        while a.get_peer(&c_id).is_none() && start.elapsed() < Duration::from_secs(5) {
            tick_all(&mut [&mut a, &mut b, &mut c], Duration::from_millis(50), &mut events);
        }

        assert!(a.get_peer(&b.node_id().id()).is_some());
        assert!(a.get_peer(&c_id).is_some());
    }

    #[test]
    fn eviction_keeps_live_incumbent() {
        let mut a = manager(Config {
            bucket_size: 1,
            ping_count: 1,
            ..Default::default()
        });
        let local = a.node_id().id();

        let mut b = manager(Config {
            secret_key: Some(far_key(&local)),
            ..Default::default()
        });
        let mut c = manager(Config {
            secret_key: Some(far_key(&local)),
            ..Default::default()
        });

        for peer in [loopback(&b), loopback(&c)] {
            let (sender, receiver) = flume::bounded(1);
            a.add_peer(peer, Some(sender));
            wait(&mut [&mut a, &mut b, &mut c], &receiver, &mut vec![]).unwrap();
        }

        tick_all(&mut [&mut a, &mut b, &mut c], Duration::from_millis(200), &mut vec![]);

        assert!(a.get_peer(&b.node_id().id()).is_some());
        assert!(a.get_peer(&c.node_id().id()).is_none());
        assert!(a.ban_list.is_id_banned(&c.node_id().id()));
    }

    #[test]
    fn eviction_replaces_dead_incumbent() {
        let mut a = manager(Config {
            bucket_size: 1,
            ping_count: 1,
            request_timeout: Duration::from_millis(200),
            ..Default::default()
        });
        let local = a.node_id().id();

        let mut b = manager(Config {
            secret_key: Some(far_key(&local)),
            ..Default::default()
        });
        let b_id = b.node_id().id();
        let b_endpoint = loopback(&b);

        let mut c = manager(Config {
            secret_key: Some(far_key(&local)),
            ..Default::default()
        });

        let (sender, receiver) = flume::bounded(1);
        a.add_peer(b_endpoint, Some(sender));
        wait(&mut [&mut a, &mut b], &receiver, &mut vec![]).unwrap();

        // B goes away, and its cached probe result expires.
        drop(b);
        let mut events = vec![];
        tick_all(&mut [&mut a], Duration::from_millis(1100), &mut events);

        let (sender, receiver) = flume::bounded(1);
        a.add_peer(loopback(&c), Some(sender));
        wait(&mut [&mut a, &mut c], &receiver, &mut events).unwrap();

        tick_all(&mut [&mut a, &mut c], Duration::from_millis(500), &mut events);

        assert!(a.get_peer(&b_id).is_none());
        assert!(a.get_peer(&c.node_id().id()).is_some());
        assert!(a.ban_list.is_id_banned(&b_id));
        assert!(events
            .iter()
            .any(|e| matches!(e, DptEvent::PeerRemoved(contact) if contact.id() == &b_id)));
    }

    #[test]
    fn ban_peer_removes() {
        let mut a = manager(Config::default());
        let contact = Contact::new(
            NodeId::random(),
            Endpoint::new([10, 0, 0, 1].into(), Some(30303), None),
        );

        a.insert(contact.clone());
        assert!(a.get_peer(contact.id()).is_some());

        a.ban_peer(&contact, Duration::from_secs(60));

        assert!(a.get_peer(contact.id()).is_none());
        assert!(a.ban_list.is_contact_banned(&contact));

        let events = a.tick();
        assert!(events
            .iter()
            .any(|e| matches!(e, DptEvent::PeerRemoved(c) if c == &contact)));
    }
}
