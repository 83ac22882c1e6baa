//! RLPx transport: ECIES handshake, framed messages and sub-protocol
//! multiplexing over TCP.

mod config;
pub mod ecies;
mod handle;
pub mod mac;
pub mod peer;
pub mod protocol;
pub mod server;

use std::time::Duration;

pub use config::Config;
pub use ecies::EciesError;
pub use handle::{Rlpx, RlpxInfo, RlpxWasShutdown};
pub use peer::{PeerError, PeerEvent, PeerSession, SessionConfig};
pub use protocol::{
    Capability, CapabilityName, ConfigError, DisconnectReason, Hello, ProtocolSendError,
    ProtocolSender, SessionInfo, SharedCapability, SubProtocol,
};
pub use server::{ConnectError, RlpxError, RlpxEvent, RlpxServer};

/// Default interval between pings on a connected session.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);
/// Default time to wait for a pong.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(10);
/// Default maximum number of connected peers.
pub const DEFAULT_MAX_PEERS: usize = 10;
/// Default time to wait for an outbound TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn default_client_id() -> String {
    format!("devp2p-rs/{}", env!("CARGO_PKG_VERSION"))
}
