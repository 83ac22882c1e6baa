//! AsyncDpt node.

use std::time::Duration;

use flume::Receiver;

use crate::{
    common::{Contact, Endpoint, Id},
    discovery::{DptError, DptEvent, Info},
    dpt::{ActorMessage, Dpt, DptWasShutdown},
};

impl Dpt {
    /// Return an async version of the Dpt node.
    pub fn as_async(self) -> AsyncDpt {
        AsyncDpt(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the Dpt node.
pub struct AsyncDpt(Dpt);

impl AsyncDpt {
    // === Getters ===

    /// Information and statistics about this [Dpt] node.
    pub async fn info(&self) -> Result<Info, DptWasShutdown> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.0
             .0
            .send(ActorMessage::Info(sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DptWasShutdown)
    }

    /// Returns the contact with this id if it is in the routing table.
    pub async fn get_peer(&self, id: Id) -> Result<Option<Contact>, DptWasShutdown> {
        let (sender, receiver) = flume::bounded::<Option<Contact>>(1);

        self.0
             .0
            .send(ActorMessage::GetPeer(id, sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DptWasShutdown)
    }

    /// Returns all the contacts in the routing table.
    pub async fn peers(&self) -> Result<Vec<Contact>, DptWasShutdown> {
        let (sender, receiver) = flume::bounded::<Vec<Contact>>(1);

        self.0
             .0
            .send(ActorMessage::Peers(sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DptWasShutdown)
    }

    /// Returns the contacts closest to `id`, at most a bucket worth.
    pub async fn closest_peers(&self, id: Id) -> Result<Vec<Contact>, DptWasShutdown> {
        let (sender, receiver) = flume::bounded::<Vec<Contact>>(1);

        self.0
             .0
            .send(ActorMessage::ClosestPeers(id, sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DptWasShutdown)
    }

    /// Subscribe to [DptEvent]s, use [Receiver::recv_async] to await them.
    pub fn events(&self) -> Result<Receiver<DptEvent>, DptWasShutdown> {
        self.0.events()
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop.
    pub async fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0 .0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv_async().await;
    }

    pub async fn bootstrap(&self, endpoint: Endpoint) -> Result<Contact, DptError> {
        let (sender, receiver) = flume::bounded::<Result<Contact, DptError>>(1);

        self.0
             .0
            .send(ActorMessage::Bootstrap(endpoint, sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DptWasShutdown)?
    }

    pub async fn add_peer(&self, endpoint: Endpoint) -> Result<Contact, DptError> {
        let (sender, receiver) = flume::bounded::<Result<Contact, DptError>>(1);

        self.0
             .0
            .send(ActorMessage::AddPeer(endpoint, sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DptWasShutdown)?
    }

    pub async fn ban_peer(&self, contact: Contact, duration: Duration) -> Result<(), DptWasShutdown> {
        let (sender, receiver) = flume::bounded::<()>(1);

        self.0
             .0
            .send(ActorMessage::BanPeer(contact, duration, sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DptWasShutdown)
    }

    pub async fn remove_peer(&self, id: Id) -> Result<Option<Contact>, DptWasShutdown> {
        let (sender, receiver) = flume::bounded::<Option<Contact>>(1);

        self.0
             .0
            .send(ActorMessage::RemovePeer(id, sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DptWasShutdown)
    }

    pub async fn refresh(&self) -> Result<(), DptWasShutdown> {
        let (sender, receiver) = flume::bounded::<()>(1);

        self.0
             .0
            .send(ActorMessage::Refresh(sender))
            .map_err(|_| DptWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DptWasShutdown)
    }
}
