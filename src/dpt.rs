//! Dpt node, a handle to a discovery actor running on its own thread.

mod actor;

use std::{thread, time::Duration};

use flume::{Receiver, Sender};
use tracing::info;

use crate::{
    common::{Contact, Endpoint, Id},
    discovery::{Config, DptError, DptEvent, Info},
};

pub(crate) use actor::ActorMessage;
use actor::Actor;

#[derive(Debug, Clone)]
/// Discovery node, maintaining a routing table of live devp2p peers.
pub struct Dpt(pub(crate) Sender<ActorMessage>);

#[derive(Debug, Default, Clone)]
/// A builder for [Dpt] nodes.
pub struct DptBuilder(Config);

impl DptBuilder {
    /// Set the secret key this node signs packets with.
    pub fn secret_key(mut self, secret_key: secp256k1::SecretKey) -> Self {
        self.0.secret_key = Some(secret_key);

        self
    }

    /// Set an explicit UDP port to listen on.
    pub fn port(mut self, port: u16) -> Self {
        self.0.port = Some(port);

        self
    }

    /// Set the endpoint advertised in liveness probes.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.0.endpoint = Some(endpoint);

        self
    }

    /// Set the time to wait for a reply to a liveness probe.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.0.request_timeout = request_timeout;

        self
    }

    /// Set the interval between routing table refreshes.
    pub fn refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.0.refresh_interval = refresh_interval;

        self
    }

    /// Set the endpoints to bootstrap from on start.
    pub fn bootstrap(mut self, bootstrap: &[Endpoint]) -> Self {
        self.0.bootstrap = bootstrap.to_vec();

        self
    }

    /// Disable correlating replies by the hash of the probe's payload.
    pub fn no_compatibility_mode(mut self) -> Self {
        self.0.compatibility_mode = false;

        self
    }

    /// Create a Dpt node.
    pub fn build(self) -> Result<Dpt, std::io::Error> {
        Dpt::new(self.0)
    }
}

impl Dpt {
    /// Create a new Dpt node.
    ///
    /// Returns an error if the UDP socket could not be bound.
    pub fn new(config: Config) -> Result<Self, std::io::Error> {
        let (sender, receiver) = flume::unbounded();
        let (ready_sender, ready_receiver) = flume::bounded::<std::io::Result<()>>(1);

        thread::Builder::new()
            .name("devp2p::Dpt actor thread".to_string())
            .spawn(move || run(config, receiver, ready_sender))?;

        ready_receiver
            .recv()
            .map_err(|_| std::io::Error::other("Dpt actor thread exited unexpectedly"))??;

        Ok(Dpt(sender))
    }

    /// Returns a builder to edit settings before creating a Dpt node.
    pub fn builder() -> DptBuilder {
        DptBuilder::default()
    }

    // === Getters ===

    /// Information and statistics about this [Dpt] node.
    pub fn info(&self) -> Result<Info, DptWasShutdown> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.0
            .send(ActorMessage::Info(sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv().map_err(|_| DptWasShutdown)
    }

    /// Returns the contact with this id if it is in the routing table.
    pub fn get_peer(&self, id: Id) -> Result<Option<Contact>, DptWasShutdown> {
        let (sender, receiver) = flume::bounded::<Option<Contact>>(1);

        self.0
            .send(ActorMessage::GetPeer(id, sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv().map_err(|_| DptWasShutdown)
    }

    /// Returns all the contacts in the routing table.
    pub fn peers(&self) -> Result<Vec<Contact>, DptWasShutdown> {
        let (sender, receiver) = flume::bounded::<Vec<Contact>>(1);

        self.0
            .send(ActorMessage::Peers(sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv().map_err(|_| DptWasShutdown)
    }

    /// Returns the contacts closest to `id`, at most a bucket worth.
    pub fn closest_peers(&self, id: Id) -> Result<Vec<Contact>, DptWasShutdown> {
        let (sender, receiver) = flume::bounded::<Vec<Contact>>(1);

        self.0
            .send(ActorMessage::ClosestPeers(id, sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv().map_err(|_| DptWasShutdown)
    }

    /// Subscribe to [DptEvent]s emitted after this call.
    pub fn events(&self) -> Result<Receiver<DptEvent>, DptWasShutdown> {
        let (sender, receiver) = flume::unbounded::<DptEvent>();

        self.0
            .send(ActorMessage::Subscribe(sender))
            .map_err(|_| DptWasShutdown)?;

        Ok(receiver)
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop.
    pub fn shutdown(&self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv();
    }

    /// Add the peer at `endpoint`, then ask it for its closest nodes.
    ///
    /// Blocks until the peer answers the liveness probe or the probe times out.
    pub fn bootstrap(&self, endpoint: Endpoint) -> Result<Contact, DptError> {
        let (sender, receiver) = flume::bounded::<Result<Contact, DptError>>(1);

        self.0
            .send(ActorMessage::Bootstrap(endpoint, sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv().map_err(|_| DptWasShutdown)?
    }

    /// Add the peer at `endpoint` to the routing table if it answers a liveness probe.
    ///
    /// Returns the already known contact immediately if the endpoint is known.
    pub fn add_peer(&self, endpoint: Endpoint) -> Result<Contact, DptError> {
        let (sender, receiver) = flume::bounded::<Result<Contact, DptError>>(1);

        self.0
            .send(ActorMessage::AddPeer(endpoint, sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv().map_err(|_| DptWasShutdown)?
    }

    /// Ban a contact for `duration` and remove it from the routing table.
    pub fn ban_peer(&self, contact: Contact, duration: Duration) -> Result<(), DptWasShutdown> {
        let (sender, receiver) = flume::bounded::<()>(1);

        self.0
            .send(ActorMessage::BanPeer(contact, duration, sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv().map_err(|_| DptWasShutdown)
    }

    /// Remove a contact from the routing table, returning it if it was there.
    pub fn remove_peer(&self, id: Id) -> Result<Option<Contact>, DptWasShutdown> {
        let (sender, receiver) = flume::bounded::<Option<Contact>>(1);

        self.0
            .send(ActorMessage::RemovePeer(id, sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv().map_err(|_| DptWasShutdown)
    }

    /// Ask every known peer for the nodes closest to a random target now,
    /// instead of waiting for the next periodic refresh.
    pub fn refresh(&self) -> Result<(), DptWasShutdown> {
        let (sender, receiver) = flume::bounded::<()>(1);

        self.0
            .send(ActorMessage::Refresh(sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv().map_err(|_| DptWasShutdown)
    }
}

fn run(
    config: Config,
    receiver: Receiver<ActorMessage>,
    ready_sender: Sender<std::io::Result<()>>,
) {
    let mut actor = match Actor::new(config, receiver) {
        Ok(actor) => {
            let _ = ready_sender.send(Ok(()));
            actor
        }
        Err(error) => {
            let _ = ready_sender.send(Err(error));
            return;
        }
    };

    while actor.tick().is_ok() {}

    info!("devp2p::Dpt actor thread stopped");
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Dpt node was shutdown")]
/// The actor thread of this [Dpt] node is no longer running.
pub struct DptWasShutdown;

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use super::*;

    fn loopback(dpt: &Dpt) -> Endpoint {
        let info = dpt.info().unwrap();

        Endpoint::new(
            Ipv4Addr::LOCALHOST.into(),
            Some(info.local_addr().port()),
            None,
        )
    }

    #[test]
    fn shutdown() {
        let dpt = Dpt::new(Config::default()).unwrap();

        let clone = dpt.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            clone.shutdown();
        });

        handle.join().unwrap();

        assert_eq!(dpt.info().unwrap_err(), DptWasShutdown);
        assert!(matches!(
            dpt.add_peer(Endpoint::default()),
            Err(DptError::Shutdown(DptWasShutdown))
        ));
    }

    #[test]
    fn bind_error() {
        let a = Dpt::new(Config::default()).unwrap();
        let port = a.info().unwrap().local_addr().port();

        let result = Dpt::builder().port(port).build();

        assert!(result.is_err());
    }

    #[test]
    fn add_peer() {
        let a = Dpt::new(Config::default()).unwrap();
        let b = Dpt::new(Config::default()).unwrap();

        let events = a.events().unwrap();

        let contact = a.add_peer(loopback(&b)).unwrap();

        assert_eq!(contact.node_id(), b.info().unwrap().node_id());
        assert_eq!(a.peers().unwrap(), vec![contact.clone()]);
        assert_eq!(a.get_peer(*contact.id()).unwrap(), Some(contact.clone()));

        let mut added = false;
        while let Ok(event) = events.recv_timeout(Duration::from_millis(500)) {
            if matches!(&event, DptEvent::PeerAdded(peer) if peer == &contact) {
                added = true;
                break;
            }
        }
        assert!(added);

        a.ban_peer(contact.clone(), Duration::from_secs(60)).unwrap();
        assert!(a.peers().unwrap().is_empty());
        assert!(matches!(
            a.add_peer(loopback(&b)),
            Err(DptError::Banned)
        ));
    }

    #[test]
    fn bootstrap() {
        let a = Dpt::new(Config::default()).unwrap();
        let b = Dpt::new(Config::default()).unwrap();
        let c = Dpt::new(Config::default()).unwrap();

        b.add_peer(loopback(&c)).unwrap();

        a.bootstrap(loopback(&b)).unwrap();

        let c_id = c.info().unwrap().node_id().id();

        let start = std::time::Instant::now();
        while a.get_peer(c_id).unwrap().is_none() {
            assert!(start.elapsed() < Duration::from_secs(3));
            thread::sleep(Duration::from_millis(20));
        }

        assert_eq!(a.closest_peers(c_id).unwrap()[0].id(), &c_id);
        assert!(a.remove_peer(c_id).unwrap().is_some());
        assert!(a.get_peer(c_id).unwrap().is_none());
    }
}
