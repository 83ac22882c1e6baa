//! Rlpx node, a handle to an [RlpxServer] running on its own thread.

use std::{net::SocketAddr, thread, time::Instant};

use flume::{Receiver, RecvError, Sender, TryRecvError};
use tracing::{debug, info, trace};

use crate::{common::NodeId, discovery::DptEvent};

use super::{
    config::Config,
    peer::DISCONNECT_GRACE,
    protocol::{DisconnectReason, SessionInfo},
    server::{ConnectError, RlpxError, RlpxEvent, RlpxServer},
};

#[derive(Debug, Clone)]
/// RLPx node, accepting and dialing encrypted sessions with devp2p peers.
pub struct Rlpx(Sender<ActorMessage>);

#[derive(Debug, Clone)]
/// Information and statistics about an RLPx node.
pub struct RlpxInfo {
    node_id: NodeId,
    local_addr: SocketAddr,
    peers: usize,
}

impl RlpxInfo {
    /// This node's identity.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Local TCP address this node is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connected peers.
    pub fn peers(&self) -> usize {
        self.peers
    }
}

impl Rlpx {
    /// Create a new Rlpx node.
    ///
    /// Returns an error if the capabilities are invalid or the TCP port could not be bound.
    pub fn new(config: Config) -> Result<Self, RlpxError> {
        let server = RlpxServer::new(config)?;

        let (sender, receiver) = flume::unbounded();

        thread::Builder::new()
            .name("devp2p::Rlpx actor thread".to_string())
            .spawn(move || run(server, receiver))?;

        Ok(Rlpx(sender))
    }

    // === Getters ===

    /// Information and statistics about this [Rlpx] node.
    pub fn info(&self) -> Result<RlpxInfo, RlpxWasShutdown> {
        let (sender, receiver) = flume::bounded::<RlpxInfo>(1);

        self.0
            .send(ActorMessage::Info(sender))
            .map_err(|_| RlpxWasShutdown)?;

        receiver.recv().map_err(|_| RlpxWasShutdown)
    }

    /// Connected peers.
    pub fn peers(&self) -> Result<Vec<SessionInfo>, RlpxWasShutdown> {
        let (sender, receiver) = flume::bounded::<Vec<SessionInfo>>(1);

        self.0
            .send(ActorMessage::Peers(sender))
            .map_err(|_| RlpxWasShutdown)?;

        receiver.recv().map_err(|_| RlpxWasShutdown)
    }

    /// Subscribe to [RlpxEvent]s emitted after this call.
    pub fn events(&self) -> Result<Receiver<RlpxEvent>, RlpxWasShutdown> {
        let (sender, receiver) = flume::unbounded::<RlpxEvent>();

        self.0
            .send(ActorMessage::Subscribe(sender))
            .map_err(|_| RlpxWasShutdown)?;

        Ok(receiver)
    }

    // === Public Methods ===

    /// Dial a node, the result of the handshake is reported as an [RlpxEvent].
    pub fn connect(&self, node_id: NodeId, addr: SocketAddr) -> Result<(), ConnectError> {
        let (sender, receiver) = flume::bounded::<Result<(), ConnectError>>(1);

        self.0
            .send(ActorMessage::Connect(node_id, addr, sender))
            .map_err(|_| RlpxWasShutdown)?;

        receiver.recv().map_err(|_| RlpxWasShutdown)?
    }

    /// Disconnect a node, returns false if it had no session.
    pub fn disconnect(
        &self,
        node_id: NodeId,
        reason: DisconnectReason,
    ) -> Result<bool, RlpxWasShutdown> {
        let (sender, receiver) = flume::bounded::<bool>(1);

        self.0
            .send(ActorMessage::Disconnect(node_id, reason, sender))
            .map_err(|_| RlpxWasShutdown)?;

        receiver.recv().map_err(|_| RlpxWasShutdown)
    }

    /// Dial peers as they are added to a discovery routing table, while
    /// below the maximum number of peers.
    ///
    /// Pass the receiver of [crate::Dpt::events].
    pub fn follow(&self, dpt_events: Receiver<DptEvent>) -> Result<(), RlpxWasShutdown> {
        self.0
            .send(ActorMessage::Follow(dpt_events))
            .map_err(|_| RlpxWasShutdown)
    }

    /// Disconnect every peer with [DisconnectReason::ClientQuitting] and
    /// shutdown the actor thread loop.
    ///
    /// Blocks until every peer hung up, or for at most [DISCONNECT_GRACE].
    pub fn shutdown(&self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv();
    }
}

fn run(server: RlpxServer, receiver: Receiver<ActorMessage>) {
    let mut actor = Actor {
        server,
        receiver,
        subscribers: vec![],
        following: vec![],
    };

    while actor.tick().is_ok() {}

    info!("devp2p::Rlpx actor thread stopped");
}

#[derive(Debug)]
struct Actor {
    server: RlpxServer,
    receiver: Receiver<ActorMessage>,
    subscribers: Vec<Sender<RlpxEvent>>,
    following: Vec<Receiver<DptEvent>>,
}

impl Actor {
    /// Returns an error if the actor's sender is dropped, or the actor was shutdown.
    fn tick(&mut self) -> Result<(), RecvError> {
        loop {
            match self.receiver.try_recv() {
                Ok(ActorMessage::Shutdown(sender)) => {
                    debug!("devp2p::Rlpx's actor thread was shutdown.");

                    self.close_sessions();

                    let _ = sender.send(());
                    return Err(RecvError::Disconnected);
                }
                Ok(actor_message) => self.handle(actor_message),
                Err(TryRecvError::Disconnected) => {
                    // Rlpx was dropped, kill this thread.
                    debug!("devp2p::Rlpx's actor thread was shutdown after Drop.");
                    return Err(RecvError::Disconnected);
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        self.follow_discovery();

        let events = self.server.tick();
        self.broadcast(events);

        Ok(())
    }

    /// Disconnect every peer, ticking until they all hung up or [DISCONNECT_GRACE] passed.
    fn close_sessions(&mut self) {
        let deadline = Instant::now() + DISCONNECT_GRACE;

        loop {
            // Also catches connections accepted meanwhile.
            self.server.disconnect_all(DisconnectReason::ClientQuitting);

            let events = self.server.tick();
            self.broadcast(events);

            if self.server.is_idle() || Instant::now() >= deadline {
                break;
            }
        }
    }

    fn broadcast(&mut self, events: Vec<RlpxEvent>) {
        if !events.is_empty() && !self.subscribers.is_empty() {
            self.subscribers.retain(|subscriber| {
                events
                    .iter()
                    .all(|event| subscriber.send(event.clone()).is_ok())
            });
        }
    }

    fn handle(&mut self, actor_message: ActorMessage) {
        match actor_message {
            ActorMessage::Info(sender) => {
                let _ = sender.send(RlpxInfo {
                    node_id: *self.server.node_id(),
                    local_addr: self.server.local_addr(),
                    peers: self.server.peers().len(),
                });
            }
            ActorMessage::Peers(sender) => {
                let _ = sender.send(self.server.peers());
            }
            ActorMessage::Connect(node_id, addr, sender) => {
                let _ = sender.send(self.server.connect(node_id, addr));
            }
            ActorMessage::Disconnect(node_id, reason, sender) => {
                let _ = sender.send(self.server.disconnect(&node_id, reason));
            }
            ActorMessage::Subscribe(sender) => self.subscribers.push(sender),
            ActorMessage::Follow(receiver) => self.following.push(receiver),
            ActorMessage::Shutdown(_) => {}
        }
    }

    fn follow_discovery(&mut self) {
        let mut discovered = vec![];

        self.following.retain(|receiver| loop {
            match receiver.try_recv() {
                Ok(DptEvent::PeerAdded(contact)) => discovered.push(contact),
                Ok(_) => {}
                Err(TryRecvError::Empty) => break true,
                Err(TryRecvError::Disconnected) => break false,
            }
        });

        for contact in discovered {
            let Some(addr) = contact.endpoint.tcp_addr() else {
                continue;
            };

            if !self.server.has_capacity() {
                trace!(node_id = ?contact.node_id(), "Not dialing discovered peer, at capacity");
                continue;
            }

            if let Err(error) = self.server.connect(*contact.node_id(), addr) {
                trace!(node_id = ?contact.node_id(), ?error, "Not dialing discovered peer");
            }
        }
    }
}

#[derive(Debug)]
enum ActorMessage {
    Info(Sender<RlpxInfo>),
    Peers(Sender<Vec<SessionInfo>>),
    Connect(NodeId, SocketAddr, Sender<Result<(), ConnectError>>),
    Disconnect(NodeId, DisconnectReason, Sender<bool>),
    Subscribe(Sender<RlpxEvent>),
    Follow(Receiver<DptEvent>),
    Shutdown(Sender<()>),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Rlpx node was shutdown")]
/// The actor thread of this [Rlpx] node is no longer running.
pub struct RlpxWasShutdown;

#[cfg(test)]
mod test {
    use std::{net::Ipv4Addr, time::Duration};

    use crate::rlpx::protocol::{Capability, SubProtocol};

    use super::*;

    struct Noop;

    impl SubProtocol for Noop {
        fn handle_message(
            &mut self,
            _code: u8,
            _payload: &[u8],
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
    }

    fn rlpx() -> Rlpx {
        Rlpx::new(Config {
            capabilities: vec![Capability::new("test", 1, 4, |_, _, _| Box::new(Noop))],
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn shutdown() {
        let a = rlpx();

        let clone = a.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            clone.shutdown();
        });

        handle.join().unwrap();

        assert_eq!(a.info().unwrap_err(), RlpxWasShutdown);
        assert!(matches!(
            a.connect(NodeId::random(), SocketAddr::from(([127, 0, 0, 1], 1))),
            Err(ConnectError::Shutdown(RlpxWasShutdown))
        ));
    }

    #[test]
    fn connect_and_disconnect() {
        let a = rlpx();
        let b = rlpx();

        let a_events = a.events().unwrap();
        let b_events = b.events().unwrap();

        let b_info = b.info().unwrap();
        a.connect(
            *b_info.node_id(),
            SocketAddr::from((Ipv4Addr::LOCALHOST, b_info.local_addr().port())),
        )
        .unwrap();

        assert!(matches!(
            a_events.recv_timeout(Duration::from_secs(2)),
            Ok(RlpxEvent::PeerAdded(info)) if info.remote_node_id == *b_info.node_id()
        ));
        assert!(matches!(
            b_events.recv_timeout(Duration::from_secs(2)),
            Ok(RlpxEvent::PeerAdded(_))
        ));
        assert_eq!(a.info().unwrap().peers(), 1);

        b.shutdown();

        assert!(matches!(
            a_events.recv_timeout(Duration::from_secs(2)),
            Ok(RlpxEvent::PeerRemoved {
                reason: Some(DisconnectReason::ClientQuitting),
                initiated_locally: false,
                ..
            })
        ));
        assert!(a.peers().unwrap().is_empty());
    }

    #[test]
    fn shutdown_notifies_peers() {
        let a = rlpx();
        let b = rlpx();

        let a_events = a.events().unwrap();
        let b_events = b.events().unwrap();

        let b_info = b.info().unwrap();
        a.connect(
            *b_info.node_id(),
            SocketAddr::from((Ipv4Addr::LOCALHOST, b_info.local_addr().port())),
        )
        .unwrap();

        assert!(matches!(
            a_events.recv_timeout(Duration::from_secs(2)),
            Ok(RlpxEvent::PeerAdded(_))
        ));
        assert!(matches!(
            b_events.recv_timeout(Duration::from_secs(2)),
            Ok(RlpxEvent::PeerAdded(_))
        ));

        let start = Instant::now();
        a.shutdown();

        // `b` hangs up on the disconnect message, before the grace period ends.
        assert!(start.elapsed() < DISCONNECT_GRACE);
        assert!(a_events.try_iter().any(|event| matches!(
            event,
            RlpxEvent::PeerRemoved {
                reason: Some(DisconnectReason::ClientQuitting),
                initiated_locally: true,
                ..
            }
        )));
        assert!(matches!(
            b_events.recv_timeout(Duration::from_secs(2)),
            Ok(RlpxEvent::PeerRemoved {
                reason: Some(DisconnectReason::ClientQuitting),
                initiated_locally: false,
                ..
            })
        ));
    }
}
