//! Answers discovery queries and runs liveness probes on top of [DiscoverySocket].

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroUsize,
    sync::Arc,
    time::{Duration, Instant},
};

use lru::LruCache;
use secp256k1::SecretKey;
use tracing::{debug, trace};

use crate::common::{Contact, Endpoint, Id, NodeId, RoutingTable};

use super::config::Config;
use super::messages::{FindNode, Hey, Message, Packet, PeerList, PeerRecord, MAX_NEIGHBORS_PER_PACKET};
use super::socket::{DiscoverySocket, PacketHash, SendMessageError};

/// How long a settled probe result is reused for the same endpoint.
pub const PROBE_CACHE_TTL: Duration = Duration::from_secs(1);
/// Maximum number of endpoints in the probe cache.
pub const PROBE_CACHE_SIZE: usize = 1000;
/// Delay before reporting an unknown sender, collapsing bursts into one report.
pub const ANNOUNCE_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
enum ProbeState {
    Pending,
    Settled {
        result: Result<Contact, ProbeError>,
        at: Instant,
    },
}

#[derive(Debug, Clone)]
/// Result of [DiscoveryServer::hey].
pub enum ProbeStatus {
    /// Answered from the probe cache, or failed before sending.
    Done(Result<Contact, ProbeError>),
    /// Waiting for a reply, settles as [ServerEvent::ProbeSettled] with this key.
    Pending(String),
}

#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A liveness probe to the endpoint with this `address:udpPort` key settled.
    ProbeSettled {
        key: String,
        result: Result<Contact, ProbeError>,
    },
    /// Peers learned from a neighbors packet, or unknown nodes that contacted us.
    PeersDiscovered(Vec<PeerRecord>),
}

#[derive(Debug)]
/// Discovery server owning the UDP socket and the state of outstanding probes.
pub struct DiscoveryServer {
    socket: DiscoverySocket,
    endpoint: Endpoint,
    protocol_version: u64,
    bucket_size: usize,
    probes: LruCache<String, ProbeState>,
    /// Probe packet hash to the probed endpoint.
    pending: HashMap<PacketHash, Endpoint>,
    announcements: HashMap<Id, (Instant, PeerRecord)>,
}

impl DiscoveryServer {
    pub fn new(config: &Config, secret_key: SecretKey) -> Result<Self, std::io::Error> {
        let socket = DiscoverySocket::new(config, secret_key)?;

        let endpoint = config.endpoint.unwrap_or(Endpoint::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Some(socket.local_addr().port()),
            None,
        ));

        Ok(Self {
            socket,
            endpoint,
            protocol_version: config.protocol_version,
            bucket_size: config.bucket_size,
            probes: LruCache::new(
                NonZeroUsize::new(PROBE_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            ),
            pending: HashMap::new(),
            announcements: HashMap::new(),
        })
    }

    // === Getters ===

    /// Returns the address the server is listening to.
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub fn node_id(&self) -> &NodeId {
        self.socket.node_id()
    }

    /// Endpoint advertised in outgoing probes.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    // === Public Methods ===

    /// Send a liveness probe to `endpoint`, unless one is already inflight
    /// or settled less than [PROBE_CACHE_TTL] ago.
    pub fn hey(&mut self, endpoint: &Endpoint) -> ProbeStatus {
        let Some(address) = endpoint.udp_addr() else {
            return ProbeStatus::Done(Err(ProbeError::NoUdpPort));
        };

        let key = endpoint.key();

        match self.probes.get(&key) {
            Some(ProbeState::Pending) => return ProbeStatus::Pending(key),
            Some(ProbeState::Settled { result, at }) if at.elapsed() < PROBE_CACHE_TTL => {
                return ProbeStatus::Done(result.clone());
            }
            _ => {}
        }

        let message = Message::Hey(Hey::probe(self.protocol_version, self.endpoint, *endpoint));

        match self.socket.request(address, message) {
            Ok(hash) => {
                self.pending.insert(hash, *endpoint);
                self.probes.put(key.clone(), ProbeState::Pending);

                ProbeStatus::Pending(key)
            }
            Err(error) => {
                debug!(?error, %endpoint, "Error sending liveness probe");

                ProbeStatus::Done(Err(ProbeError::Send(Arc::new(error))))
            }
        }
    }

    /// Ask the node at `endpoint` for its contacts closest to `target`.
    pub fn find_node(&mut self, endpoint: &Endpoint, target: NodeId) {
        let Some(address) = endpoint.udp_addr() else {
            return;
        };

        let message = Message::FindNode(FindNode {
            target,
            timestamp: super::messages::expiration(),
        });

        if let Err(error) = self.socket.send(address, message) {
            debug!(?error, %endpoint, "Error sending find node");
        }
    }

    /// Expire probes, flush due announcements and handle at most one incoming packet.
    pub fn tick(&mut self, routing_table: &RoutingTable) -> Vec<ServerEvent> {
        let mut events = vec![];

        for request in self.socket.expired_requests() {
            if let Some(endpoint) = self.pending.remove(&request.hash) {
                debug!(%endpoint, "Liveness probe timed out");

                events.push(self.settle(&endpoint, Err(ProbeError::Timeout)));
            }
        }

        self.flush_announcements(routing_table, &mut events);

        if let Some((packet, from)) = self.socket.recv_from() {
            self.handle_packet(packet, from, routing_table, &mut events);
        }

        events
    }

    // === Private Methods ===

    fn settle(&mut self, endpoint: &Endpoint, result: Result<Contact, ProbeError>) -> ServerEvent {
        let key = endpoint.key();

        self.probes.put(
            key.clone(),
            ProbeState::Settled {
                result: result.clone(),
                at: Instant::now(),
            },
        );

        ServerEvent::ProbeSettled { key, result }
    }

    fn handle_packet(
        &mut self,
        packet: Packet,
        from: SocketAddr,
        routing_table: &RoutingTable,
        events: &mut Vec<ServerEvent>,
    ) {
        self.schedule_announcement(&packet, from, routing_table);

        match packet.message {
            Message::Hey(hey) => match hey.echo {
                None => {
                    let to = Endpoint::new(from.ip(), Some(from.port()), hey.from.tcp_port);
                    let reply = Hey::reply(self.protocol_version, self.endpoint, to, packet.hash);

                    if let Err(error) = self.socket.send(from, Message::Hey(reply)) {
                        debug!(?error, ?from, "Error replying to liveness probe");
                    }
                }
                Some(hash) => {
                    if let Some(endpoint) = self.pending.remove(&hash) {
                        trace!(%endpoint, node_id = ?packet.node_id, "Liveness probe answered");

                        let contact =
                            Contact::new(packet.node_id, endpoint).with_clock(hey.timestamp as u64);

                        events.push(self.settle(&endpoint, Ok(contact)));
                    }
                }
            },
            Message::FindNode(find_node) => {
                let peers: Vec<PeerRecord> = routing_table
                    .closest(&find_node.target.id(), self.bucket_size)
                    .into_iter()
                    .filter(|contact| contact.node_id() != &packet.node_id)
                    .map(|contact| PeerRecord {
                        endpoint: contact.endpoint,
                        node_id: *contact.node_id(),
                    })
                    .collect();

                for chunk in peers.chunks(MAX_NEIGHBORS_PER_PACKET) {
                    let message = Message::Neighbors(PeerList::new(chunk.to_vec()));

                    if let Err(error) = self.socket.send(from, message) {
                        debug!(?error, ?from, "Error sending neighbors");
                    }
                }
            }
            Message::Neighbors(list) => {
                let own = self.socket.node_id();
                let peers: Vec<PeerRecord> = list
                    .peers
                    .into_iter()
                    .filter(|peer| &peer.node_id != own)
                    .collect();

                if !peers.is_empty() {
                    events.push(ServerEvent::PeersDiscovered(peers));
                }
            }
            message => {
                // Topic advertisement is not supported.
                debug!(?from, message_type = ?message.message_type(), "Ignoring topic message");
            }
        }
    }

    fn schedule_announcement(&mut self, packet: &Packet, from: SocketAddr, routing_table: &RoutingTable) {
        let id = packet.node_id.id();

        if routing_table.contains(&id) || self.announcements.contains_key(&id) {
            return;
        }

        let tcp_port = match &packet.message {
            Message::Hey(hey) if hey.from.udp_port.is_none() => return,
            Message::Hey(hey) => hey.from.tcp_port,
            _ => None,
        };

        let record = PeerRecord {
            endpoint: Endpoint::new(from.ip(), Some(from.port()), tcp_port),
            node_id: packet.node_id,
        };

        self.announcements
            .insert(id, (Instant::now() + ANNOUNCE_DEBOUNCE, record));
    }

    fn flush_announcements(&mut self, routing_table: &RoutingTable, events: &mut Vec<ServerEvent>) {
        if self.announcements.is_empty() {
            return;
        }

        let now = Instant::now();
        let mut due = vec![];

        self.announcements.retain(|id, (deadline, record)| {
            if *deadline > now {
                return true;
            }

            if !routing_table.contains(id) {
                due.push(record.clone());
            }

            false
        });

        if !due.is_empty() {
            events.push(ServerEvent::PeersDiscovered(due));
        }
    }
}

#[derive(thiserror::Error, Debug, Clone)]
/// Liveness probe failures.
pub enum ProbeError {
    #[error("Liveness probe timed out")]
    Timeout,

    #[error("Endpoint has no UDP port to probe")]
    NoUdpPort,

    #[error("Failed to send liveness probe: {0}")]
    Send(Arc<SendMessageError>),
}
