#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;

#[cfg(feature = "async")]
pub mod async_dpt;
pub mod discovery;
mod dpt;
pub mod rlpx;

pub use crate::common::{
    clock_arbiter, AddOutcome, Arbiter, BanList, Contact, Endpoint, Id, InvalidIdSize, NodeId,
    RoutingTable, Selection, DEFAULT_BUCKET_SIZE_K, DEFAULT_PING_COUNT, ID_SIZE, NODE_ID_SIZE,
};
pub use discovery::{DptError, DptEvent};
pub use dpt::{Dpt, DptBuilder, DptWasShutdown};
pub use rlpx::{Rlpx, RlpxWasShutdown};

// Rexports
pub use secp256k1::{PublicKey, SecretKey};
