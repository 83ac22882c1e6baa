//! UDP socket layer signing outgoing packets and correlating probes with their replies.

mod inflight_requests;

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use secp256k1::{All, Secp256k1, SecretKey};
use sha3::{Digest, Keccak256};
use tracing::{debug, trace};

use crate::common::NodeId;

use super::config::Config;
use super::messages::{EncodeError, Message, Packet, HEADER_SIZE, MAX_PACKET_SIZE};

pub use inflight_requests::{InflightRequest, PacketHash};
use inflight_requests::InflightRequests;

const MTU: usize = 2048;

/// The maximum duration to backoff checking the [UdpSocket] buffer after it is empty.
/// Lower values increases CPU usage, but reduces latency, and drains the buffer faster,
/// reducing the risk of packet loss.
pub const MAX_THREAD_BLOCK_DURATION: Duration = Duration::from_millis(10);

/// A UdpSocket wrapper that signs, verifies and correlates discovery packets.
#[derive(Debug)]
pub struct DiscoverySocket {
    socket: UdpSocket,
    secp: Secp256k1<All>,
    secret_key: SecretKey,
    node_id: NodeId,
    local_addr: SocketAddr,
    compatibility_mode: bool,
    inflight_requests: InflightRequests,
}

impl DiscoverySocket {
    pub(crate) fn new(config: &Config, secret_key: SecretKey) -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], config.port.unwrap_or(0))))?;
        let local_addr = socket.local_addr()?;

        socket.set_nonblocking(true)?;

        let secp = Secp256k1::new();
        let node_id = NodeId::from(secret_key.public_key(&secp));

        Ok(Self {
            socket,
            secp,
            secret_key,
            node_id,
            local_addr,
            compatibility_mode: config.compatibility_mode,
            inflight_requests: InflightRequests::new(config.request_timeout),
        })
    }

    // === Getters ===

    /// Returns the address the server is listening to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the identity packets are signed with.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    // === Public Methods ===

    /// Returns true if a request with this packet hash is still inflight.
    pub fn inflight(&self, hash: &PacketHash) -> bool {
        self.inflight_requests.contains(hash)
    }

    /// Send a request expecting a correlated reply, returns its packet hash.
    pub fn request(
        &mut self,
        address: SocketAddr,
        message: Message,
    ) -> Result<PacketHash, SendMessageError> {
        let (bytes, hash) = message.to_bytes(&self.secp, &self.secret_key)?;

        let alias: Option<PacketHash> = self
            .compatibility_mode
            .then(|| Keccak256::digest(&bytes[HEADER_SIZE..]).into());

        self.inflight_requests.add(hash, address, alias);

        trace!(context = "socket_message_sending", ?message, ?address);
        self.socket.send_to(&bytes, address)?;

        Ok(hash)
    }

    /// Send a message that expects no correlated reply.
    pub fn send(&mut self, address: SocketAddr, message: Message) -> Result<(), SendMessageError> {
        let (bytes, _) = message.to_bytes(&self.secp, &self.secret_key)?;

        trace!(context = "socket_message_sending", ?message, ?address);
        self.socket.send_to(&bytes, address)?;

        Ok(())
    }

    /// Remove and return requests that timed out.
    pub fn expired_requests(&mut self) -> Vec<InflightRequest> {
        self.inflight_requests.cleanup()
    }

    /// Receives a single discovery packet on the socket.
    ///
    /// Replies echoing an alias of one of our probes are rewritten to echo
    /// the probe's packet hash.
    pub fn recv_from(&mut self) -> Option<(Packet, SocketAddr)> {
        let mut buf = [0u8; MTU];

        match self.socket.recv_from(&mut buf) {
            Ok((amt, from)) => {
                let bytes = &buf[..amt];

                if from.port() == 0 {
                    trace!(
                        context = "socket_validation",
                        message = "Packet from port 0"
                    );
                    return None;
                }

                if amt > MAX_PACKET_SIZE {
                    trace!(context = "socket_validation", ?from, size = amt, "Oversized packet");
                    return None;
                }

                match Message::from_bytes(&self.secp, bytes) {
                    Ok(mut packet) => {
                        trace!(
                            context = "socket_message_receiving",
                            message = ?packet.message,
                            ?from,
                            "Received packet"
                        );

                        if packet.node_id == self.node_id {
                            trace!(context = "socket_validation", "Packet from ourselves");
                            return None;
                        }

                        if packet.message.is_expired() {
                            trace!(context = "socket_validation", ?from, "Expired packet");
                            return None;
                        }

                        if self.is_expected_response(&mut packet, &from) {
                            return Some((packet, from));
                        }
                    }
                    Err(error) => {
                        debug!(
                            context = "socket_error",
                            ?error,
                            ?from,
                            "Received invalid discovery packet"
                        );
                    }
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(MAX_THREAD_BLOCK_DURATION);
            }
            Err(e) => {
                trace!(
                    context = "socket_error",
                    ?e,
                    "recv_from failed unexpectedly"
                );
            }
        }

        None
    }

    // === Private Methods ===

    /// Requests pass through, replies have to match an inflight probe.
    fn is_expected_response(&mut self, packet: &mut Packet, from: &SocketAddr) -> bool {
        let Message::Hey(hey) = &mut packet.message else {
            return true;
        };

        let Some(echo) = hey.echo else {
            return true;
        };

        match self.inflight_requests.remove(&echo, from) {
            Some(request) => {
                hey.echo = Some(request.hash);
                true
            }
            None => {
                trace!(
                    context = "socket_validation",
                    ?from,
                    message = "Unexpected or late reply"
                );
                false
            }
        }
    }
}

#[derive(thiserror::Error, Debug)]
/// Errors sending a discovery packet.
pub enum SendMessageError {
    #[error(transparent)]
    /// Message could not be encoded.
    Encode(#[from] EncodeError),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}
