//! Passive Bitcoin peer-to-peer network crawler and traffic recorder.
//!
//! The crawler maintains a bounded population of peer connections, completes
//! the version/verack handshake, harvests gossiped addresses, and records
//! every received message in textual and binary form through a chain of
//! record processors.

pub mod filter;
pub mod manager;
pub mod map;
pub mod network;
pub mod peer;
pub mod record;
pub mod recorder;
pub mod repo;
pub mod tracker;

pub use network::Network;

/// Highest protocol version the crawler will negotiate.
pub const PROTOCOL_VERSION: u32 = 70002;

/// Lowest protocol version still accepted from a peer. Versions below this
/// predate multi-address `addr` messages and are useless to a crawler.
pub const MIN_PROTOCOL_VERSION: u32 = 209;

/// User agent advertised in our `version` messages.
pub const USER_AGENT: &str = "/bitsonde:0.1.0/";

/// Hard cap on the payload size of a single wire message (32 MiB).
pub const MAX_MESSAGE_SIZE: u32 = 32 * 1024 * 1024;
