//! Tether Relay — fans every inbound frame out to all other peers.
//!
//! The relay owns the peer set, runs one broadcaster task per accepted
//! connection, and serves the WebSocket endpoint plus a health check.
//! Frames are forwarded verbatim; the relay never needs to understand them.

pub mod broadcaster;
pub mod peers;
pub mod server;

pub use broadcaster::Broadcaster;
pub use peers::{BroadcastReport, PeerHandle, PeerSet, PeerSummary};
pub use server::{RelayConfig, RelayError, RelayServer};
