//! Base protocol messages, capabilities and sub-protocol registration.

use std::{
    collections::BTreeMap,
    fmt::{self, Debug, Display, Formatter},
    net::SocketAddr,
    sync::Arc,
};

use flume::Sender;
use rlp::{DecoderError, Rlp, RlpStream};

use crate::common::NodeId;

/// Version of the base protocol advertised in [Hello].
pub const BASE_PROTOCOL_VERSION: u64 = 4;
/// Message codes reserved for the base protocol, sub-protocols start after them.
pub const BASE_PROTOCOL_LENGTH: u8 = 16;

pub(crate) const HELLO: u8 = 0x00;
pub(crate) const DISCONNECT: u8 = 0x01;
pub(crate) const PING: u8 = 0x02;
pub(crate) const PONG: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Reason sent in, or received with, a disconnect message.
pub enum DisconnectReason {
    DisconnectRequested,
    NetworkError,
    ProtocolError,
    UselessPeer,
    TooManyPeers,
    AlreadyConnected,
    IncompatibleVersion,
    InvalidIdentity,
    ClientQuitting,
    UnexpectedIdentity,
    SameIdentity,
    Timeout,
    SubprotocolError,
    /// A code outside of the known reasons.
    Unknown(u8),
}

impl DisconnectReason {
    pub fn code(&self) -> u8 {
        match self {
            DisconnectReason::DisconnectRequested => 0x00,
            DisconnectReason::NetworkError => 0x01,
            DisconnectReason::ProtocolError => 0x02,
            DisconnectReason::UselessPeer => 0x03,
            DisconnectReason::TooManyPeers => 0x04,
            DisconnectReason::AlreadyConnected => 0x05,
            DisconnectReason::IncompatibleVersion => 0x06,
            DisconnectReason::InvalidIdentity => 0x07,
            DisconnectReason::ClientQuitting => 0x08,
            DisconnectReason::UnexpectedIdentity => 0x09,
            DisconnectReason::SameIdentity => 0x0a,
            DisconnectReason::Timeout => 0x0b,
            DisconnectReason::SubprotocolError => 0x10,
            DisconnectReason::Unknown(code) => *code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => DisconnectReason::DisconnectRequested,
            0x01 => DisconnectReason::NetworkError,
            0x02 => DisconnectReason::ProtocolError,
            0x03 => DisconnectReason::UselessPeer,
            0x04 => DisconnectReason::TooManyPeers,
            0x05 => DisconnectReason::AlreadyConnected,
            0x06 => DisconnectReason::IncompatibleVersion,
            0x07 => DisconnectReason::InvalidIdentity,
            0x08 => DisconnectReason::ClientQuitting,
            0x09 => DisconnectReason::UnexpectedIdentity,
            0x0a => DisconnectReason::SameIdentity,
            0x0b => DisconnectReason::Timeout,
            0x10 => DisconnectReason::SubprotocolError,
            code => DisconnectReason::Unknown(code),
        }
    }
}

impl Display for DisconnectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let description = match self {
            DisconnectReason::DisconnectRequested => "disconnect requested",
            DisconnectReason::NetworkError => "network error",
            DisconnectReason::ProtocolError => "protocol error",
            DisconnectReason::UselessPeer => "useless peer",
            DisconnectReason::TooManyPeers => "too many peers",
            DisconnectReason::AlreadyConnected => "already connected",
            DisconnectReason::IncompatibleVersion => "incompatible version",
            DisconnectReason::InvalidIdentity => "invalid identity",
            DisconnectReason::ClientQuitting => "client quitting",
            DisconnectReason::UnexpectedIdentity => "unexpected identity",
            DisconnectReason::SameIdentity => "same identity",
            DisconnectReason::Timeout => "timeout",
            DisconnectReason::SubprotocolError => "subprotocol error",
            DisconnectReason::Unknown(code) => return write!(f, "unknown ({code:#04x})"),
        };

        f.write_str(description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// A capability as advertised in [Hello], `eth/63` for example.
pub struct CapabilityName {
    pub name: String,
    pub version: u64,
}

impl Display for CapabilityName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// First message exchanged on a session.
pub struct Hello {
    pub protocol_version: u64,
    pub client_id: String,
    pub capabilities: Vec<CapabilityName>,
    /// Listening TCP port, if any.
    pub port: Option<u16>,
    pub node_id: NodeId,
}

impl Hello {
    pub fn encode(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(5);

        stream.append(&self.protocol_version);
        stream.append(&self.client_id.as_bytes().to_vec());

        stream.begin_list(self.capabilities.len());
        for capability in &self.capabilities {
            stream.begin_list(2);
            stream.append(&capability.name.as_bytes().to_vec());
            stream.append(&capability.version);
        }

        match self.port {
            Some(port) => stream.append(&(port as u64)),
            None => stream.append_empty_data(),
        };
        stream.append(&self.node_id.to_vec());

        stream.out().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecoderError> {
        let rlp = Rlp::new(bytes);

        let capabilities = rlp
            .at(2)?
            .iter()
            .map(|item| {
                Ok(CapabilityName {
                    name: String::from_utf8_lossy(item.at(0)?.data()?).into_owned(),
                    version: decode_uint(item.at(1)?.data()?)?,
                })
            })
            .collect::<Result<Vec<_>, DecoderError>>()?;

        let port = match decode_uint(rlp.at(3)?.data()?)? {
            0 => None,
            port => Some(
                u16::try_from(port).map_err(|_| DecoderError::Custom("port out of range"))?,
            ),
        };

        Ok(Hello {
            protocol_version: decode_uint(rlp.at(0)?.data()?)?,
            client_id: String::from_utf8_lossy(rlp.at(1)?.data()?).into_owned(),
            capabilities,
            port,
            node_id: NodeId::from_bytes(rlp.at(4)?.data()?)
                .map_err(|_| DecoderError::Custom("invalid node id"))?,
        })
    }
}

/// Lenient big endian integer, accepting leading zeros.
fn decode_uint(bytes: &[u8]) -> Result<u64, DecoderError> {
    if bytes.len() > 8 {
        return Err(DecoderError::RlpIsTooBig);
    }

    Ok(bytes
        .iter()
        .fold(0_u64, |acc, byte| (acc << 8) | *byte as u64))
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A capability both sides support, and the message codes assigned to it.
pub struct SharedCapability {
    pub name: String,
    pub version: u64,
    pub offset: u8,
    pub length: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Everything known about the remote side once hello messages were exchanged.
pub struct SessionInfo {
    pub remote_node_id: NodeId,
    pub remote_addr: SocketAddr,
    pub hello: Hello,
    pub capabilities: Vec<SharedCapability>,
}

/// Handler of one negotiated sub-protocol on one session.
pub trait SubProtocol: Send {
    /// Handle a message, `code` is relative to the sub-protocol's offset.
    ///
    /// Returning an error disconnects the session with
    /// [DisconnectReason::SubprotocolError].
    fn handle_message(
        &mut self,
        code: u8,
        payload: &[u8],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Instantiates a [SubProtocol] for a session, given the negotiated version.
pub type ProtocolConstructor =
    Arc<dyn Fn(u64, &SessionInfo, ProtocolSender) -> Box<dyn SubProtocol> + Send + Sync>;

#[derive(Clone)]
/// A sub-protocol this node supports.
pub struct Capability {
    pub name: String,
    pub version: u64,
    /// Number of message codes the sub-protocol uses.
    pub length: u8,
    pub constructor: ProtocolConstructor,
}

impl Capability {
    pub fn new<F>(name: &str, version: u64, length: u8, constructor: F) -> Self
    where
        F: Fn(u64, &SessionInfo, ProtocolSender) -> Box<dyn SubProtocol> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            version,
            length,
            constructor: Arc::new(constructor),
        }
    }

    pub fn capability_name(&self) -> CapabilityName {
        CapabilityName {
            name: self.name.clone(),
            version: self.version,
        }
    }
}

impl Debug for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("length", &self.length)
            .finish()
    }
}

#[derive(Debug)]
pub(crate) enum Outbound {
    Message { code: u8, payload: Vec<u8> },
    Disconnect(DisconnectReason),
}

#[derive(Debug, Clone)]
/// Sends messages on behalf of a sub-protocol, translating its codes
/// to the session's code space.
pub struct ProtocolSender {
    offset: u8,
    length: u8,
    sender: Sender<Outbound>,
}

impl ProtocolSender {
    pub(crate) fn new(offset: u8, length: u8, sender: Sender<Outbound>) -> Self {
        Self {
            offset,
            length,
            sender,
        }
    }

    /// Send a message, `code` is relative to the sub-protocol's offset.
    pub fn send(&self, code: u8, payload: Vec<u8>) -> Result<(), ProtocolSendError> {
        let out_of_range = ProtocolSendError::CodeOutOfRange {
            code,
            length: self.length,
        };

        if code >= self.length {
            return Err(out_of_range);
        }

        let code = self.offset.checked_add(code).ok_or(out_of_range)?;

        self.sender
            .send(Outbound::Message { code, payload })
            .map_err(|_| ProtocolSendError::SessionClosed)
    }

    /// Ask the session to disconnect.
    pub fn disconnect(&self, reason: DisconnectReason) -> Result<(), ProtocolSendError> {
        self.sender
            .send(Outbound::Disconnect(reason))
            .map_err(|_| ProtocolSendError::SessionClosed)
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors sending a sub-protocol message.
pub enum ProtocolSendError {
    #[error("Message code {code} out of range, sub-protocol has {length} codes")]
    CodeOutOfRange { code: u8, length: u8 },

    #[error("Session is closed")]
    SessionClosed,
}

#[derive(Debug, Clone)]
pub(crate) struct Negotiated {
    pub capability: Capability,
    pub offset: u8,
}

/// Keep, per name, the highest version both sides advertise, sorted by
/// name, with contiguous code ranges starting after the base protocol.
pub(crate) fn negotiate(local: &[Capability], remote: &[CapabilityName]) -> Vec<Negotiated> {
    let mut shared: BTreeMap<&str, &Capability> = BTreeMap::new();

    for advertised in remote {
        for capability in local {
            if capability.name != advertised.name || capability.version != advertised.version {
                continue;
            }

            match shared.get(capability.name.as_str()) {
                Some(existing) if existing.version > capability.version => {}
                _ => {
                    shared.insert(capability.name.as_str(), capability);
                }
            }
        }
    }

    let mut offset = BASE_PROTOCOL_LENGTH;
    let mut negotiated = Vec::with_capacity(shared.len());

    for capability in shared.into_values() {
        negotiated.push(Negotiated {
            capability: capability.clone(),
            offset,
        });

        match offset.checked_add(capability.length) {
            Some(next) => offset = next,
            None => break,
        }
    }

    negotiated
}

/// Check that a capability table can always be negotiated into the code space.
pub fn validate_capabilities(capabilities: &[Capability]) -> Result<(), ConfigError> {
    if capabilities.is_empty() {
        return Err(ConfigError::NoCapabilities);
    }

    let mut longest: BTreeMap<&str, u8> = BTreeMap::new();

    for (index, capability) in capabilities.iter().enumerate() {
        if capability.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if capability.length == 0 {
            return Err(ConfigError::ZeroLength(capability.capability_name()));
        }

        let duplicate = capabilities[..index]
            .iter()
            .any(|other| other.name == capability.name && other.version == capability.version);
        if duplicate {
            return Err(ConfigError::Duplicate(capability.capability_name()));
        }

        let length = longest.entry(capability.name.as_str()).or_default();
        *length = (*length).max(capability.length);
    }

    let total: usize = BASE_PROTOCOL_LENGTH as usize
        + longest.values().map(|length| *length as usize).sum::<usize>();

    if total > u8::MAX as usize + 1 {
        return Err(ConfigError::CodeSpaceExhausted(total));
    }

    Ok(())
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Invalid RLPx configuration.
pub enum ConfigError {
    #[error("At least one capability is required")]
    NoCapabilities,

    #[error("Capability name is empty")]
    EmptyName,

    #[error("Capability {0} has no message codes")]
    ZeroLength(CapabilityName),

    #[error("Capability {0} is registered twice")]
    Duplicate(CapabilityName),

    #[error("Capabilities need {0} message codes, at most 256 are available")]
    CodeSpaceExhausted(usize),
}
