//! RLPx server: accepts and dials TCP connections, and keeps track of sessions.

use std::{
    collections::HashSet,
    io::ErrorKind,
    net::{SocketAddr, TcpListener, TcpStream},
    thread,
    time::Duration,
};

use flume::{Receiver, Sender};
use rand::thread_rng;
use secp256k1::{Secp256k1, SecretKey};
use tracing::{debug, info, trace};

use crate::common::NodeId;

use super::{
    config::Config,
    handle::RlpxWasShutdown,
    peer::{PeerError, PeerEvent, PeerSession, SessionConfig},
    protocol::{validate_capabilities, ConfigError, DisconnectReason, SessionInfo},
};

/// The maximum duration to backoff checking the [TcpListener] after it is empty.
pub const MAX_THREAD_BLOCK_DURATION: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct Dial {
    node_id: NodeId,
    result: std::io::Result<TcpStream>,
}

#[derive(Debug)]
struct Entry {
    session: PeerSession,
    /// Passed the checks after hello, and reported as [RlpxEvent::PeerAdded].
    announced: bool,
}

#[derive(Debug, Clone)]
/// Notifications about RLPx peers.
pub enum RlpxEvent {
    /// A session completed its hello exchange and was accepted.
    PeerAdded(SessionInfo),
    /// An accepted session was closed.
    PeerRemoved {
        node_id: NodeId,
        reason: Option<DisconnectReason>,
        initiated_locally: bool,
    },
    /// A connection failed or reported an error.
    PeerError {
        node_id: Option<NodeId>,
        error: PeerError,
    },
}

/// Listens for RLPx connections, dials outbound ones, and drives every
/// [PeerSession] from [RlpxServer::tick].
#[derive(Debug)]
pub struct RlpxServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    node_id: NodeId,
    session_config: SessionConfig,
    max_peers: usize,
    connect_timeout: Duration,
    remote_client_id_filter: Vec<String>,
    sessions: Vec<Entry>,
    dialing: HashSet<NodeId>,
    dial_sender: Sender<Dial>,
    dial_receiver: Receiver<Dial>,
}

impl RlpxServer {
    pub fn new(config: Config) -> Result<Self, RlpxError> {
        validate_capabilities(&config.capabilities)?;

        let listener = TcpListener::bind(SocketAddr::from((
            [0, 0, 0, 0],
            config.listen_port.unwrap_or(0),
        )))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let secret_key = config
            .secret_key
            .unwrap_or_else(|| SecretKey::new(&mut thread_rng()));
        let node_id = NodeId::from(secret_key.public_key(&Secp256k1::signing_only()));

        info!(address = ?local_addr, ?node_id, "RLPx listening");

        let (dial_sender, dial_receiver) = flume::unbounded();

        Ok(Self {
            listener,
            local_addr,
            node_id,
            session_config: SessionConfig {
                secret_key,
                client_id: config.client_id,
                capabilities: config.capabilities,
                port: Some(local_addr.port()),
                ping_interval: config.ping_interval,
                ping_timeout: config.ping_timeout,
            },
            max_peers: config.max_peers,
            connect_timeout: config.connect_timeout,
            remote_client_id_filter: config.remote_client_id_filter,
            sessions: vec![],
            dialing: HashSet::new(),
            dial_sender,
            dial_receiver,
        })
    }

    // === Getters ===

    /// Returns the address the server is listening to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Accepted and still connected peers.
    pub fn peers(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .filter(|entry| entry.announced && entry.session.is_connected())
            .filter_map(|entry| entry.session.info().cloned())
            .collect()
    }

    /// Returns true if no session is open, including ones still closing.
    pub fn is_idle(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns true if a new outbound connection would be accepted.
    pub fn has_capacity(&self) -> bool {
        self.connected_count() + self.dialing.len() < self.max_peers
    }

    // === Public Methods ===

    /// Dial a node in the background, the session shows up as
    /// [RlpxEvent::PeerAdded] once the hello exchange completes.
    pub fn connect(&mut self, node_id: NodeId, addr: SocketAddr) -> Result<(), ConnectError> {
        if node_id == self.node_id {
            return Err(ConnectError::SameIdentity);
        }

        let known = self.dialing.contains(&node_id)
            || self.sessions.iter().any(|entry| {
                !entry.session.is_finished() && entry.session.remote_node_id() == Some(&node_id)
            });
        if known {
            return Err(ConnectError::AlreadyConnected);
        }

        if !self.has_capacity() {
            return Err(ConnectError::TooManyPeers);
        }

        debug!(?node_id, %addr, "Dialing peer");

        let sender = self.dial_sender.clone();
        let timeout = self.connect_timeout;

        thread::Builder::new()
            .name("devp2p::Rlpx dial".to_string())
            .spawn(move || {
                let result = TcpStream::connect_timeout(&addr, timeout);
                let _ = sender.send(Dial { node_id, result });
            })?;

        self.dialing.insert(node_id);

        Ok(())
    }

    /// Disconnect every session with this node, returns false if there was none.
    pub fn disconnect(&mut self, node_id: &NodeId, reason: DisconnectReason) -> bool {
        let mut found = false;

        for entry in self
            .sessions
            .iter_mut()
            .filter(|entry| entry.session.remote_node_id() == Some(node_id))
        {
            entry.session.disconnect(reason);
            found = true;
        }

        found
    }

    pub fn disconnect_all(&mut self, reason: DisconnectReason) {
        for entry in &mut self.sessions {
            entry.session.disconnect(reason);
        }
    }

    /// Accept incoming connections, start finished dials, and drive every session.
    pub fn tick(&mut self) -> Vec<RlpxEvent> {
        let mut events = vec![];

        self.accept(&mut events);
        self.start_dialed(&mut events);

        let mut connected = vec![];

        for (index, entry) in self.sessions.iter_mut().enumerate() {
            for event in entry.session.tick() {
                match event {
                    PeerEvent::Connected(info) => connected.push((index, info)),
                    PeerEvent::Closed {
                        reason,
                        initiated_locally,
                    } => {
                        let node_id = entry.session.remote_node_id().copied();

                        debug!(?node_id, ?reason, initiated_locally, "Session closed");

                        if let (true, Some(node_id)) = (entry.announced, node_id) {
                            events.push(RlpxEvent::PeerRemoved {
                                node_id,
                                reason,
                                initiated_locally,
                            });
                        }
                    }
                    PeerEvent::Error(error) => events.push(RlpxEvent::PeerError {
                        node_id: entry.session.remote_node_id().copied(),
                        error,
                    }),
                }
            }
        }

        for (index, info) in connected {
            match self.refusal(index, &info) {
                Some(reason) => self.sessions[index].session.disconnect(reason),
                None => {
                    info!(
                        node_id = ?info.remote_node_id,
                        client_id = %info.hello.client_id,
                        "Peer connected"
                    );

                    self.sessions[index].announced = true;
                    events.push(RlpxEvent::PeerAdded(info));
                }
            }
        }

        self.sessions.retain(|entry| !entry.session.is_finished());

        events
    }

    // === Private Methods ===

    fn connected_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.announced && !entry.session.is_finished())
            .count()
    }

    fn accept(&mut self, events: &mut Vec<RlpxEvent>) {
        loop {
            match self.listener.accept() {
                Ok((stream, from)) => {
                    trace!(?from, "Incoming connection");

                    match PeerSession::incoming(stream, self.session_config.clone()) {
                        Ok(session) => self.sessions.push(Entry {
                            session,
                            announced: false,
                        }),
                        Err(error) => events.push(RlpxEvent::PeerError {
                            node_id: None,
                            error,
                        }),
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(MAX_THREAD_BLOCK_DURATION);
                    return;
                }
                Err(error) => {
                    debug!(?error, "Accepting connection failed");
                    return;
                }
            }
        }
    }

    fn start_dialed(&mut self, events: &mut Vec<RlpxEvent>) {
        while let Ok(dial) = self.dial_receiver.try_recv() {
            self.dialing.remove(&dial.node_id);

            let session = dial.result.map_err(PeerError::from).and_then(|stream| {
                PeerSession::outgoing(stream, dial.node_id, self.session_config.clone())
            });

            match session {
                Ok(session) => self.sessions.push(Entry {
                    session,
                    announced: false,
                }),
                Err(error) => {
                    debug!(node_id = ?dial.node_id, ?error, "Dialing failed");

                    events.push(RlpxEvent::PeerError {
                        node_id: Some(dial.node_id),
                        error,
                    });
                }
            }
        }
    }

    /// Reason to refuse a session that just completed its hello exchange.
    fn refusal(&self, index: usize, info: &SessionInfo) -> Option<DisconnectReason> {
        if info.remote_node_id == self.node_id {
            return Some(DisconnectReason::SameIdentity);
        }

        let duplicate = self.sessions.iter().enumerate().any(|(other, entry)| {
            other != index
                && entry.announced
                && !entry.session.is_finished()
                && entry.session.remote_node_id() == Some(&info.remote_node_id)
        });
        if duplicate {
            return Some(DisconnectReason::AlreadyConnected);
        }

        let filtered = self
            .remote_client_id_filter
            .iter()
            .any(|filter| info.hello.client_id.contains(filter.as_str()));
        if filtered {
            return Some(DisconnectReason::UselessPeer);
        }

        if self.connected_count() >= self.max_peers {
            return Some(DisconnectReason::TooManyPeers);
        }

        None
    }
}

#[derive(thiserror::Error, Debug)]
/// Errors creating an RLPx server.
pub enum RlpxError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
/// Errors starting an outbound connection.
pub enum ConnectError {
    #[error("Refusing to connect to ourselves")]
    SameIdentity,

    #[error("Already connected or connecting to this node")]
    AlreadyConnected,

    #[error("Too many peers")]
    TooManyPeers,

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Shutdown(#[from] RlpxWasShutdown),
}
