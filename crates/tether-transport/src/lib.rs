//! Tether Transport Layer
//!
//! A single duplex message-stream abstraction that all traffic flows over.
//! The transport layer handles:
//! - Connection lifecycle (connect, send, receive, close)
//! - Frame size bounds
//! - Close and connect timeouts
//!
//! Agent and relay logic are decoupled from the wire via the `Transport` and
//! `Connector` traits. Implementations: WebSocket client (`client`),
//! server-side WebSocket (`server`), in-process pair (`memory`).

pub mod client;
pub mod connection;
pub mod error;
pub mod memory;
pub mod server;

use std::future::Future;

pub use client::{WsConfig, WsConnection, WsConnector};
pub use connection::ConnectionInfo;
pub use error::TransportError;
pub use server::ServerConnection;

/// Default upper bound for a single frame (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1 << 20;

/// One live, bidirectional connection.
///
/// `send` and `receive` may be called concurrently from different tasks;
/// each `send` delivers one whole frame. `close` is idempotent.
pub trait Transport: Send + Sync + 'static {
    /// Identity, address and activity bookkeeping for this connection.
    fn info(&self) -> &ConnectionInfo;

    /// Send one text frame.
    fn send(&self, frame: String) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Wait for the next text frame.
    ///
    /// `TransportError::Protocol` means a single bad frame was skipped and the
    /// connection is still usable; every other error ends the connection.
    /// An inbound frame over the size limit ends it too.
    fn receive(&self) -> impl Future<Output = Result<String, TransportError>> + Send;

    /// Close the connection. Calling it more than once is a no-op.
    fn close(&self) -> impl Future<Output = ()> + Send;

    fn id(&self) -> &str {
        &self.info().id
    }

    fn is_open(&self) -> bool {
        self.info().is_open()
    }
}

/// Opens client connections to an address.
pub trait Connector: Send + Sync + 'static {
    type Connection: Transport;

    fn connect(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// Reject frames larger than `max` bytes.
pub fn check_frame_size(frame: &str, max: usize) -> Result<(), TransportError> {
    if frame.len() > max {
        return Err(TransportError::FrameTooLarge {
            size: frame.len(),
            max,
        });
    }
    Ok(())
}
