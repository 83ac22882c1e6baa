use std::time::Duration;

use secp256k1::SecretKey;

use crate::common::{Endpoint, DEFAULT_BUCKET_SIZE_K, DEFAULT_PING_COUNT};

use super::{DEFAULT_REFRESH_INTERVAL, DEFAULT_REQUEST_TIMEOUT, PROTOCOL_VERSION};

#[derive(Debug, Clone)]
/// Discovery (DPT) configurations
pub struct Config {
    /// Secret key this node signs packets with, its public key is the node's identity.
    ///
    /// Defaults to None, where a random key is generated.
    pub secret_key: Option<SecretKey>,
    /// Explicit UDP port to listen on.
    ///
    /// Defaults to None, where the OS picks a free port.
    pub port: Option<u16>,
    /// Endpoint advertised to other nodes in liveness probes.
    ///
    /// Defaults to None, where `0.0.0.0` and the bound UDP port are advertised,
    /// and the receiving node uses the observed source address instead.
    pub endpoint: Option<Endpoint>,
    /// Version sent in liveness probes.
    ///
    /// Defaults to [PROTOCOL_VERSION]
    pub protocol_version: u64,
    /// Time to wait for a reply to a liveness probe before giving up.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Interval between two refreshes, asking every known peer for neighbors of a random target.
    ///
    /// Defaults to [DEFAULT_REFRESH_INTERVAL]
    pub refresh_interval: Duration,
    /// Maximum contacts per routing table bucket.
    ///
    /// Defaults to [DEFAULT_BUCKET_SIZE_K]
    pub bucket_size: usize,
    /// Oldest contacts probed when a full bucket is asked to admit a new contact.
    ///
    /// Defaults to [DEFAULT_PING_COUNT]
    pub ping_count: usize,
    /// Also correlate replies that echo the hash of the probe's payload,
    /// instead of the packet hash, as some clients do.
    ///
    /// Defaults to `true`
    pub compatibility_mode: bool,
    /// Endpoints to bootstrap from as soon as the node starts.
    ///
    /// Defaults to an empty list
    pub bootstrap: Vec<Endpoint>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            secret_key: None,
            port: None,
            endpoint: None,
            protocol_version: PROTOCOL_VERSION,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            bucket_size: DEFAULT_BUCKET_SIZE_K,
            ping_count: DEFAULT_PING_COUNT,
            compatibility_mode: true,
            bootstrap: vec![],
        }
    }
}
