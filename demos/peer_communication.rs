use std::{error::Error, net::SocketAddr, time::Duration};

use clap::Parser;
use devp2p::rlpx::{
    Capability, Config, DisconnectReason, ProtocolSender, RlpxEvent, SessionInfo, SubProtocol,
};
use devp2p::Rlpx;
use flume::Sender;
use tracing::Level;
use tracing_subscriber;

const CHAT_MESSAGE: u8 = 0;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Messages each peer sends before disconnecting.
    #[arg(short, long, default_value_t = 3)]
    messages: usize,
}

/// Answers every chat message until `remaining` runs out.
struct Chat {
    name: &'static str,
    remaining: usize,
    sender: ProtocolSender,
    log: Sender<String>,
}

impl Chat {
    fn say(&mut self, text: String) {
        if self.remaining == 0 {
            let _ = self.sender.disconnect(DisconnectReason::DisconnectRequested);
            return;
        }
        self.remaining -= 1;

        let _ = self
            .sender
            .send(CHAT_MESSAGE, rlp::encode(&text).to_vec());
    }
}

impl SubProtocol for Chat {
    fn handle_message(
        &mut self,
        code: u8,
        payload: &[u8],
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        if code != CHAT_MESSAGE {
            return Err(format!("unexpected chat code {code}").into());
        }

        let text: String = rlp::Rlp::new(payload).as_val()?;
        let _ = self.log.send(format!("{} received: {text}", self.name));

        let reply = format!("{} #{}", self.name, self.remaining);
        self.say(reply);

        Ok(())
    }
}

fn node(name: &'static str, messages: usize, log: Sender<String>) -> Rlpx {
    let capability = Capability::new("chat", 1, 1, move |_version, info: &SessionInfo, sender| {
        let _ = log.send(format!(
            "{name} connected to {} ({})",
            info.hello.client_id, info.remote_addr
        ));

        let mut chat = Chat {
            name,
            remaining: messages,
            sender,
            log: log.clone(),
        };

        if name == "alice" {
            chat.say(format!("{name} says hi"));
        }

        Box::new(chat)
    });

    Rlpx::new(Config {
        client_id: format!("{name}/demo"),
        capabilities: vec![capability],
        ..Default::default()
    })
    .unwrap()
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    let (log_sender, log) = flume::unbounded::<String>();

    let alice = node("alice", cli.messages, log_sender.clone());
    let bob = node("bob", cli.messages, log_sender);

    let events = alice.events().unwrap();

    let bob_info = bob.info().unwrap();
    let bob_addr = SocketAddr::from(([127, 0, 0, 1], bob_info.local_addr().port()));

    alice.connect(*bob_info.node_id(), bob_addr).unwrap();

    loop {
        while let Ok(line) = log.try_recv() {
            println!("{line}");
        }

        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(RlpxEvent::PeerRemoved {
                reason,
                initiated_locally,
                ..
            }) => {
                println!("Session closed: {reason:?} (initiated locally: {initiated_locally})");
                break;
            }
            Ok(RlpxEvent::PeerError { error, .. }) => {
                println!("Session error: {error}");
                break;
            }
            _ => {}
        }
    }

    while let Ok(line) = log.try_recv() {
        println!("{line}");
    }

    alice.shutdown();
    bob.shutdown();
}
