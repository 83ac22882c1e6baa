//! One RLPx session over a non-blocking TCP stream.

use std::{
    io::{ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::{Buf, BytesMut};
use flume::{Receiver, Sender};
use rlp::{Rlp, RlpStream};
use secp256k1::{Secp256k1, SecretKey};
use tracing::{debug, trace};

use crate::common::NodeId;

use super::{
    ecies::{body_read_size, Ecies, EciesError, ACK_SIZE, AUTH_SIZE, HEADER_SIZE},
    protocol::{
        negotiate, Capability, DisconnectReason, Hello, Outbound, ProtocolSender,
        SessionInfo, SharedCapability, SubProtocol, BASE_PROTOCOL_LENGTH,
        BASE_PROTOCOL_VERSION, DISCONNECT, HELLO, PING, PONG,
    },
    DEFAULT_PING_INTERVAL, DEFAULT_PING_TIMEOUT,
};

/// Time between sending our disconnect message and closing the socket.
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone)]
/// Settings shared by all sessions of a node.
pub struct SessionConfig {
    pub secret_key: SecretKey,
    pub client_id: String,
    pub capabilities: Vec<Capability>,
    /// TCP port advertised in [Hello].
    pub port: Option<u16>,
    /// Defaults to [DEFAULT_PING_INTERVAL]
    pub ping_interval: Duration,
    /// Defaults to [DEFAULT_PING_TIMEOUT]
    pub ping_timeout: Duration,
}

impl SessionConfig {
    pub fn new(secret_key: SecretKey, capabilities: Vec<Capability>) -> Self {
        Self {
            secret_key,
            client_id: super::default_client_id(),
            capabilities,
            port: None,
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Auth,
    Ack,
    Header,
    Body,
}

struct Binding {
    offset: u8,
    length: u8,
    protocol: Box<dyn SubProtocol>,
}

#[derive(Debug, Clone)]
/// Notifications from a [PeerSession].
pub enum PeerEvent {
    /// Hello messages were exchanged and at least one capability is shared.
    Connected(SessionInfo),
    /// The socket was closed, `reason` is known if a disconnect message was sent or received.
    Closed {
        reason: Option<DisconnectReason>,
        initiated_locally: bool,
    },
    Error(PeerError),
}

/// RLPx session state machine: ECIES handshake, hello exchange, then framed
/// messages dispatched to the base protocol or negotiated sub-protocols.
pub struct PeerSession {
    stream: TcpStream,
    remote_addr: SocketAddr,
    ecies: Ecies,

    state: State,
    next_read: usize,
    read_buffer: BytesMut,
    write_buffer: BytesMut,

    config: SessionConfig,
    node_id: NodeId,
    remote_node_id: Option<NodeId>,
    hello: Option<Hello>,
    info: Option<SessionInfo>,
    protocols: Vec<Binding>,
    outbound_sender: Sender<Outbound>,
    outbound_receiver: Receiver<Outbound>,

    next_ping: Option<Instant>,
    ping_deadline: Option<Instant>,

    connected: bool,
    /// No more input is processed.
    closed: bool,
    close_at: Option<Instant>,
    finished: bool,
    disconnect_reason: Option<DisconnectReason>,
    initiated_locally: bool,

    events: Vec<PeerEvent>,
}

impl PeerSession {
    /// Start a session to a known node, sending the auth message right away.
    pub fn outgoing(
        stream: TcpStream,
        remote_node_id: NodeId,
        config: SessionConfig,
    ) -> Result<Self, PeerError> {
        let mut session = Self::new(stream, Some(remote_node_id), config)?;

        let auth = session.ecies.create_auth()?;
        session.write_buffer.extend_from_slice(&auth);
        session.state = State::Ack;
        session.next_read = ACK_SIZE;

        Ok(session)
    }

    /// Accept a session, waiting for the remote's auth message.
    pub fn incoming(stream: TcpStream, config: SessionConfig) -> Result<Self, PeerError> {
        Self::new(stream, None, config)
    }

    fn new(
        stream: TcpStream,
        remote_node_id: Option<NodeId>,
        config: SessionConfig,
    ) -> Result<Self, PeerError> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;

        let remote_addr = stream.peer_addr()?;
        let ecies = Ecies::new(config.secret_key, remote_node_id.as_ref())?;
        let node_id = NodeId::from(config.secret_key.public_key(&Secp256k1::signing_only()));

        let (outbound_sender, outbound_receiver) = flume::unbounded();

        Ok(Self {
            stream,
            remote_addr,
            ecies,
            state: State::Auth,
            next_read: AUTH_SIZE,
            read_buffer: BytesMut::with_capacity(READ_CHUNK),
            write_buffer: BytesMut::new(),
            config,
            node_id,
            remote_node_id,
            hello: None,
            info: None,
            protocols: vec![],
            outbound_sender,
            outbound_receiver,
            next_ping: None,
            ping_deadline: None,
            connected: false,
            closed: false,
            close_at: None,
            finished: false,
            disconnect_reason: None,
            initiated_locally: false,
            events: vec![],
        })
    }

    // === Getters ===

    /// Identity of the remote node, known from the start for outgoing sessions,
    /// and from its hello for incoming ones.
    pub fn remote_node_id(&self) -> Option<&NodeId> {
        self.remote_node_id.as_ref()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The remote's hello message, once received.
    pub fn hello(&self) -> Option<&Hello> {
        self.hello.as_ref()
    }

    pub fn info(&self) -> Option<&SessionInfo> {
        self.info.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected && !self.closed
    }

    /// Returns true once the socket is closed, the session can be dropped.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.disconnect_reason
    }

    // === Public Methods ===

    /// Send a disconnect message, stop processing input, and close the
    /// socket after [DISCONNECT_GRACE], or as soon as the remote hangs up.
    pub fn disconnect(&mut self, reason: DisconnectReason) {
        if self.closed {
            return;
        }

        debug!(remote = %self.remote_addr, %reason, "Disconnecting peer");

        let mut stream = RlpStream::new_list(1);
        stream.append(&reason.code());

        let sent = self.send_message(DISCONNECT, &stream.out());

        self.disconnect_reason = Some(reason);
        self.initiated_locally = true;
        self.closed = true;

        self.close_at = Some(if sent {
            Instant::now() + DISCONNECT_GRACE
        } else {
            Instant::now()
        });
    }

    /// Drive the session: read and handle available frames, send queued
    /// sub-protocol messages, fire timers and flush the socket.
    pub fn tick(&mut self) -> Vec<PeerEvent> {
        if self.finished {
            return vec![];
        }

        // Keeps reading while closing, to notice the remote hanging up.
        let eof = self.read();

        while !self.closed && self.read_buffer.len() >= self.next_read {
            let packet = self.read_buffer.split_to(self.next_read);

            if let Err(error) = self.parse_packet(&packet) {
                debug!(remote = %self.remote_addr, ?error, "Closing session");
                self.events.push(PeerEvent::Error(error));
                self.close();
            }
        }

        if self.closed {
            self.read_buffer.clear();
        }

        if eof {
            trace!(remote = %self.remote_addr, "Connection closed by peer");
            self.close();
        }

        self.send_outbound();
        self.check_timers();
        self.flush();

        if self.close_at.is_some_and(|at| at <= Instant::now()) {
            self.finish();
        }

        std::mem::take(&mut self.events)
    }

    // === Private Methods ===

    /// Read everything available, returns true if the connection is gone.
    fn read(&mut self) -> bool {
        let mut buf = [0_u8; READ_CHUNK];

        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return true,
                Ok(amt) => self.read_buffer.extend_from_slice(&buf[..amt]),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return false,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(error) => {
                    self.events.push(PeerEvent::Error(error.into()));
                    return true;
                }
            }
        }
    }

    fn parse_packet(&mut self, packet: &[u8]) -> Result<(), PeerError> {
        match self.state {
            State::Auth => {
                self.ecies.parse_auth(packet)?;

                let ack = self.ecies.create_ack()?;
                self.write_buffer.extend_from_slice(&ack);

                self.state = State::Header;
                self.next_read = HEADER_SIZE;
                self.send_hello();
            }
            State::Ack => {
                self.ecies.parse_ack(packet)?;

                self.state = State::Header;
                self.next_read = HEADER_SIZE;
                self.send_hello();
            }
            State::Header => {
                let body_size = self.ecies.parse_header(packet)?;

                self.state = State::Body;
                self.next_read = body_read_size(body_size);
            }
            State::Body => {
                let body = self.ecies.parse_body(packet)?;

                self.state = State::Header;
                self.next_read = HEADER_SIZE;
                self.handle_body(&body);
            }
        }

        Ok(())
    }

    fn handle_body(&mut self, body: &[u8]) {
        let Some((code, payload)) = split_code(body) else {
            self.disconnect(DisconnectReason::ProtocolError);
            return;
        };

        trace!(remote = %self.remote_addr, code, size = payload.len(), "Received message");

        if code != HELLO && code != DISCONNECT && self.hello.is_none() {
            self.disconnect(DisconnectReason::ProtocolError);
            return;
        }

        if code < BASE_PROTOCOL_LENGTH {
            self.handle_base_message(code, payload);
            return;
        }

        let Some(binding) = self
            .protocols
            .iter_mut()
            .find(|binding| code >= binding.offset && code - binding.offset < binding.length)
        else {
            self.disconnect(DisconnectReason::ProtocolError);
            return;
        };

        let result = binding
            .protocol
            .handle_message(code - binding.offset, payload);

        if let Err(error) = result {
            self.disconnect(DisconnectReason::SubprotocolError);
            self.events
                .push(PeerEvent::Error(PeerError::SubProtocol(Arc::from(error))));
        }
    }

    fn handle_base_message(&mut self, code: u8, payload: &[u8]) {
        match code {
            HELLO => self.handle_hello(payload),
            DISCONNECT => {
                let reason = decode_disconnect_reason(payload);
                debug!(remote = %self.remote_addr, %reason, "Peer disconnected");

                self.disconnect_reason = Some(reason);
                self.initiated_locally = false;
                self.close();
            }
            PING => {
                self.send_message(PONG, &empty_list());
            }
            PONG => {
                self.ping_deadline = None;
            }
            _ => {}
        }
    }

    fn handle_hello(&mut self, payload: &[u8]) {
        if self.hello.is_some() {
            self.disconnect(DisconnectReason::ProtocolError);
            return;
        }

        let hello = match Hello::decode(payload) {
            Ok(hello) => hello,
            Err(error) => {
                self.events.push(PeerEvent::Error(PeerError::InvalidHello(error)));
                self.disconnect(DisconnectReason::ProtocolError);
                return;
            }
        };

        debug!(
            remote = %self.remote_addr,
            client_id = %hello.client_id,
            node_id = ?hello.node_id,
            "Received hello"
        );

        match self.remote_node_id {
            None => self.remote_node_id = Some(hello.node_id),
            Some(remote_node_id) if remote_node_id != hello.node_id => {
                self.hello = Some(hello);
                self.disconnect(DisconnectReason::InvalidIdentity);
                return;
            }
            Some(_) => {}
        }

        let negotiated = negotiate(&self.config.capabilities, &hello.capabilities);
        let remote_node_id = hello.node_id;
        self.hello = Some(hello.clone());

        if negotiated.is_empty() {
            self.disconnect(DisconnectReason::UselessPeer);
            return;
        }

        let info = SessionInfo {
            remote_node_id,
            remote_addr: self.remote_addr,
            hello,
            capabilities: negotiated
                .iter()
                .map(|negotiated| SharedCapability {
                    name: negotiated.capability.name.clone(),
                    version: negotiated.capability.version,
                    offset: negotiated.offset,
                    length: negotiated.capability.length,
                })
                .collect(),
        };

        self.protocols = negotiated
            .into_iter()
            .map(|negotiated| {
                let capability = negotiated.capability;
                let sender = ProtocolSender::new(
                    negotiated.offset,
                    capability.length,
                    self.outbound_sender.clone(),
                );

                Binding {
                    offset: negotiated.offset,
                    length: capability.length,
                    protocol: (capability.constructor)(capability.version, &info, sender),
                }
            })
            .collect();

        self.connected = true;
        self.next_ping = Some(Instant::now() + self.config.ping_interval);
        self.info = Some(info.clone());

        self.events.push(PeerEvent::Connected(info));
    }

    fn send_hello(&mut self) {
        let hello = Hello {
            protocol_version: BASE_PROTOCOL_VERSION,
            client_id: self.config.client_id.clone(),
            capabilities: self
                .config
                .capabilities
                .iter()
                .map(Capability::capability_name)
                .collect(),
            port: self.config.port,
            node_id: self.node_id,
        };

        self.send_message(HELLO, &hello.encode());
    }

    fn send_ping(&mut self) {
        if !self.send_message(PING, &empty_list()) {
            return;
        }

        // An unanswered ping keeps its deadline.
        if self.ping_deadline.is_none() {
            self.ping_deadline = Some(Instant::now() + self.config.ping_timeout);
        }
    }

    /// Frame and queue a message, returns false if the session is closed.
    fn send_message(&mut self, code: u8, payload: &[u8]) -> bool {
        if self.closed {
            return false;
        }

        let mut message = rlp::encode(&code).to_vec();
        message.extend_from_slice(payload);

        match self.frame(&message) {
            Ok(()) => true,
            Err(error) => {
                trace!(remote = %self.remote_addr, ?error, code, "Could not frame message");
                false
            }
        }
    }

    fn frame(&mut self, message: &[u8]) -> Result<(), EciesError> {
        let header = self.ecies.create_header(message.len())?;
        let body = self.ecies.create_body(message)?;

        self.write_buffer.extend_from_slice(&header);
        self.write_buffer.extend_from_slice(&body);

        Ok(())
    }

    fn send_outbound(&mut self) {
        while let Ok(outbound) = self.outbound_receiver.try_recv() {
            match outbound {
                Outbound::Message { code, payload } => {
                    self.send_message(code, &payload);
                }
                Outbound::Disconnect(reason) => self.disconnect(reason),
            }
        }
    }

    fn check_timers(&mut self) {
        if self.closed {
            return;
        }

        let now = Instant::now();

        if self.ping_deadline.is_some_and(|deadline| deadline <= now) {
            debug!(remote = %self.remote_addr, "Ping timeout");
            self.ping_deadline = None;
            self.disconnect(DisconnectReason::Timeout);
            return;
        }

        if self.next_ping.is_some_and(|at| at <= now) {
            self.next_ping = Some(now + self.config.ping_interval);
            self.send_ping();
        }
    }

    fn flush(&mut self) {
        while !self.write_buffer.is_empty() {
            match self.stream.write(&self.write_buffer) {
                Ok(0) => return,
                Ok(amt) => self.write_buffer.advance(amt),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(error) => {
                    trace!(remote = %self.remote_addr, ?error, "Write failed");
                    self.write_buffer.clear();
                    self.close();
                    return;
                }
            }
        }
    }

    /// Stop processing input and close the socket on this tick.
    fn close(&mut self) {
        self.closed = true;
        self.close_at = Some(Instant::now());
    }

    fn finish(&mut self) {
        self.flush();
        let _ = self.stream.shutdown(Shutdown::Both);

        self.finished = true;
        self.next_ping = None;
        self.ping_deadline = None;

        self.events.push(PeerEvent::Closed {
            reason: self.disconnect_reason,
            initiated_locally: self.initiated_locally,
        });
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("remote_addr", &self.remote_addr)
            .field("remote_node_id", &self.remote_node_id)
            .field("state", &self.state)
            .field("connected", &self.connected)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Leading RLP encoded message code, `0x80` being the encoding of 0.
fn split_code(body: &[u8]) -> Option<(u8, &[u8])> {
    match *body.first()? {
        0x80 => Some((0, &body[1..])),
        code if code < 0x80 => Some((code, &body[1..])),
        0x81 => Some((*body.get(1)?, &body[2..])),
        _ => None,
    }
}

/// Accepts `[reason]` as well as a bare `reason`, an empty one meaning 0.
fn decode_disconnect_reason(payload: &[u8]) -> DisconnectReason {
    let rlp = Rlp::new(payload);

    let item = if rlp.is_list() { rlp.at(0).ok() } else { Some(rlp) };

    let code = item
        .and_then(|item| item.data().ok()?.first().copied())
        .unwrap_or(0);

    DisconnectReason::from_code(code)
}

fn empty_list() -> Vec<u8> {
    RlpStream::new_list(0).out().to_vec()
}

#[derive(thiserror::Error, Debug, Clone)]
/// Errors ending or reported by a [PeerSession].
pub enum PeerError {
    #[error(transparent)]
    Ecies(#[from] EciesError),

    #[error(transparent)]
    IO(Arc<std::io::Error>),

    #[error("Invalid hello message: {0}")]
    InvalidHello(rlp::DecoderError),

    #[error("Sub-protocol error: {0}")]
    SubProtocol(Arc<dyn std::error::Error + Send + Sync>),
}

impl From<std::io::Error> for PeerError {
    fn from(error: std::io::Error) -> Self {
        PeerError::IO(Arc::new(error))
    }
}
