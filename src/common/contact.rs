//! Contact entries of the routing table and the endpoints they are reachable at.
use std::{
    fmt::{self, Display, Formatter},
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use crate::common::{Id, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Network endpoint of a peer, as advertised in discovery packets.
pub struct Endpoint {
    pub address: IpAddr,
    /// Discovery port, `None` if the peer doesn't speak discovery.
    pub udp_port: Option<u16>,
    /// RLPx port, `None` if the peer doesn't accept connections.
    pub tcp_port: Option<u16>,
}

impl Endpoint {
    pub fn new(address: IpAddr, udp_port: Option<u16>, tcp_port: Option<u16>) -> Self {
        Self {
            address,
            udp_port,
            tcp_port,
        }
    }

    /// Endpoint listening on the same port for both discovery and RLPx.
    pub fn from_socket_addr(address: SocketAddr) -> Self {
        Self::new(address.ip(), Some(address.port()), Some(address.port()))
    }

    /// The address to send discovery packets to.
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_port
            .map(|port| SocketAddr::new(self.address, port))
    }

    /// The address to open RLPx connections to.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_port
            .map(|port| SocketAddr::new(self.address, port))
    }

    /// `address:udpPort` key used for probe coalescing and endpoint bans.
    pub fn key(&self) -> String {
        match self.udp_port {
            Some(port) => format!("{}:{}", self.address, port),
            None => format!("{}:", self.address),
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), None, None)
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;

        match (self.udp_port, self.tcp_port) {
            (Some(udp), Some(tcp)) if udp == tcp => write!(f, ":{udp}"),
            (udp, tcp) => write!(
                f,
                " (udp: {}, tcp: {})",
                udp.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                tcp.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            ),
        }
    }
}

#[derive(Debug, Clone)]
/// Contact entry in the routing table.
pub struct Contact {
    node_id: NodeId,
    id: Id,
    pub endpoint: Endpoint,
    /// Logical clock of the last liveness proof, used to arbitrate
    /// between two versions of the same contact.
    pub clock: u64,
}

impl Contact {
    pub fn new(node_id: NodeId, endpoint: Endpoint) -> Contact {
        Contact {
            id: node_id.id(),
            node_id,
            endpoint,
            clock: 0,
        }
    }

    /// Builder for [Self::clock].
    pub fn with_clock(mut self, clock: u64) -> Self {
        self.clock = clock;
        self
    }

    // === Getters ===

    /// Returns the routing id of this contact.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Returns the public key of this contact.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Contact {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn endpoint_key() {
        let endpoint = Endpoint::new([10, 0, 0, 1].into(), Some(30303), None);
        assert_eq!(endpoint.key(), "10.0.0.1:30303");

        let endpoint = Endpoint::new([10, 0, 0, 1].into(), None, Some(30303));
        assert_eq!(endpoint.key(), "10.0.0.1:");
        assert_eq!(endpoint.udp_addr(), None);
        assert_eq!(endpoint.tcp_addr(), Some(([10, 0, 0, 1], 30303).into()));
    }

    #[test]
    fn contacts_are_equal_by_id() {
        let node_id = NodeId::random();

        let a = Contact::new(node_id, Endpoint::default());
        let b = Contact::new(node_id, Endpoint::new([1, 1, 1, 1].into(), Some(1), Some(1)))
            .with_clock(10);

        assert_eq!(a, b);
        assert_eq!(a.id(), &node_id.id());
    }
}
