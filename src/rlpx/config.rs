use std::time::Duration;

use secp256k1::SecretKey;

use super::{
    default_client_id, protocol::Capability, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_PEERS,
    DEFAULT_PING_INTERVAL, DEFAULT_PING_TIMEOUT,
};

#[derive(Debug, Clone)]
/// RLPx server configurations
pub struct Config {
    /// Secret key of this node, its public key is the identity sent in
    /// handshakes and hello messages.
    ///
    /// Defaults to None, where a random key is generated.
    pub secret_key: Option<SecretKey>,
    /// Client name sent in hello messages.
    ///
    /// Defaults to `devp2p-rs/<crate version>`
    pub client_id: String,
    /// Sub-protocols this node speaks, at least one is required.
    ///
    /// Defaults to an empty list
    pub capabilities: Vec<Capability>,
    /// Explicit TCP port to listen on.
    ///
    /// Defaults to None, where the OS picks a free port.
    pub listen_port: Option<u16>,
    /// Maximum number of connected peers, inbound and outbound.
    ///
    /// Defaults to [DEFAULT_MAX_PEERS]
    pub max_peers: usize,
    /// Interval between pings on a connected session.
    ///
    /// Defaults to [DEFAULT_PING_INTERVAL]
    pub ping_interval: Duration,
    /// Time to wait for a pong before disconnecting.
    ///
    /// Defaults to [DEFAULT_PING_TIMEOUT]
    pub ping_timeout: Duration,
    /// Time to wait for an outbound TCP connection to be established.
    ///
    /// Defaults to [DEFAULT_CONNECT_TIMEOUT]
    pub connect_timeout: Duration,
    /// Peers whose client id contains any of these strings are disconnected
    /// as useless once their hello is received.
    ///
    /// Defaults to an empty list
    pub remote_client_id_filter: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            secret_key: None,
            client_id: default_client_id(),
            capabilities: vec![],
            listen_port: None,
            max_peers: DEFAULT_MAX_PEERS,
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            remote_client_id_filter: vec![],
        }
    }
}
