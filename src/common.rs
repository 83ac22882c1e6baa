//! Identities, contacts and the data structures shared by discovery and RLPx.

mod ban_list;
mod contact;
mod id;
mod routing_table;

pub use ban_list::*;
pub use contact::*;
pub use id::*;
pub use routing_table::*;
