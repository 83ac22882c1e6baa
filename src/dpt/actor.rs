use std::time::Duration;

use flume::{Receiver, RecvError, Sender, TryRecvError};
use tracing::debug;

use crate::common::{Contact, Endpoint, Id};
use crate::discovery::{manager::AddPeerSender, Config, DiscoveryManager, DptEvent, Info};

#[derive(Debug)]
pub struct Actor {
    manager: DiscoveryManager,
    receiver: Receiver<ActorMessage>,
    subscribers: Vec<Sender<DptEvent>>,
}

impl Actor {
    pub fn new(config: Config, receiver: Receiver<ActorMessage>) -> std::io::Result<Self> {
        Ok(Self {
            manager: DiscoveryManager::new(config)?,
            receiver,
            subscribers: vec![],
        })
    }

    /// Returns an error if the actor's sender is dropped, or the actor was shutdown.
    pub fn tick(&mut self) -> Result<(), RecvError> {
        loop {
            match self.receiver.try_recv() {
                Ok(ActorMessage::Shutdown(sender)) => {
                    debug!("devp2p::Dpt's actor thread was shutdown.");
                    let _ = sender.send(());
                    return Err(RecvError::Disconnected);
                }
                Ok(actor_message) => self.handle(actor_message),
                Err(TryRecvError::Disconnected) => {
                    // Dpt was dropped, kill this thread.
                    debug!("devp2p::Dpt's actor thread was shutdown after Drop.");
                    return Err(RecvError::Disconnected);
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        let events = self.manager.tick();

        if !events.is_empty() && !self.subscribers.is_empty() {
            self.subscribers.retain(|subscriber| {
                events
                    .iter()
                    .all(|event| subscriber.send(event.clone()).is_ok())
            });
        }

        Ok(())
    }

    fn handle(&mut self, actor_message: ActorMessage) {
        match actor_message {
            ActorMessage::Info(sender) => {
                let _ = sender.send(self.manager.info());
            }
            ActorMessage::Bootstrap(endpoint, sender) => {
                self.manager.bootstrap(endpoint, Some(sender));
            }
            ActorMessage::AddPeer(endpoint, sender) => {
                self.manager.add_peer(endpoint, Some(sender));
            }
            ActorMessage::GetPeer(id, sender) => {
                let _ = sender.send(self.manager.get_peer(&id));
            }
            ActorMessage::Peers(sender) => {
                let _ = sender.send(self.manager.peers());
            }
            ActorMessage::ClosestPeers(id, sender) => {
                let _ = sender.send(self.manager.closest_peers(&id));
            }
            ActorMessage::BanPeer(contact, duration, sender) => {
                self.manager.ban_peer(&contact, duration);
                let _ = sender.send(());
            }
            ActorMessage::RemovePeer(id, sender) => {
                let _ = sender.send(self.manager.remove_peer(&id));
            }
            ActorMessage::Refresh(sender) => {
                self.manager.refresh();
                let _ = sender.send(());
            }
            ActorMessage::Subscribe(sender) => {
                self.subscribers.push(sender);
            }
            ActorMessage::Shutdown(_) => {}
        }
    }
}

#[derive(Debug)]
pub(crate) enum ActorMessage {
    Info(Sender<Info>),
    Bootstrap(Endpoint, AddPeerSender),
    AddPeer(Endpoint, AddPeerSender),
    GetPeer(Id, Sender<Option<Contact>>),
    Peers(Sender<Vec<Contact>>),
    ClosestPeers(Id, Sender<Vec<Contact>>),
    BanPeer(Contact, Duration, Sender<()>),
    RemovePeer(Id, Sender<Option<Contact>>),
    Refresh(Sender<()>),
    Subscribe(Sender<DptEvent>),
    Shutdown(Sender<()>),
}
