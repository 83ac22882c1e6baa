//! Node discovery: signed UDP packets, liveness probes and the DPT manager.

mod config;
pub mod manager;
pub mod messages;
pub mod server;
pub mod socket;

use std::time::Duration;

pub use config::Config;
pub use manager::{DiscoveryManager, DptError, DptEvent, Info};
pub use server::{DiscoveryServer, ProbeError};

/// Version advertised in liveness probes.
pub const PROTOCOL_VERSION: u64 = 4;
/// Default request timeout before abandoning a liveness probe to a non-responding node.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Default interval between routing table refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
