use std::{net::SocketAddr, thread, time::Duration};

use clap::Parser;
use devp2p::{Dpt, DptEvent, Endpoint};
use tracing::Level;
use tracing_subscriber;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Discovery endpoints to bootstrap from, `ip:port`.
    #[arg(short, long, required = true)]
    bootstrap: Vec<SocketAddr>,
    /// UDP port to listen on.
    #[arg(short, long)]
    port: Option<u16>,
    /// Seconds to keep discovering peers.
    #[arg(short, long, default_value_t = 60)]
    duration: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    let cli = Cli::parse();

    let mut builder = Dpt::builder();
    if let Some(port) = cli.port {
        builder = builder.port(port);
    }
    let dpt = builder.build().unwrap();

    let events = dpt.events().unwrap();

    for addr in &cli.bootstrap {
        match dpt.bootstrap(Endpoint::from_socket_addr(*addr)) {
            Ok(contact) => println!("Bootstrapped from {}", contact.endpoint),
            Err(error) => println!("Failed to bootstrap from {addr}: {error}"),
        }
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(cli.duration);

    while std::time::Instant::now() < deadline {
        while let Ok(event) = events.try_recv() {
            match event {
                DptEvent::PeerAdded(contact) => {
                    println!("+ {} {}", contact.node_id(), contact.endpoint)
                }
                DptEvent::PeerRemoved(contact) => {
                    println!("- {} {}", contact.node_id(), contact.endpoint)
                }
                _ => {}
            }
        }

        thread::sleep(Duration::from_millis(500));
    }

    let info = dpt.info().unwrap();

    println!("{:?}", info);
}
