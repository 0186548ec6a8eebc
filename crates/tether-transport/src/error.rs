//! Transport error taxonomy.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint could not be reached
    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    /// The peer closed the connection, or it was closed locally
    #[error("connection closed: {0}")]
    Closed(String),

    /// A single frame was malformed or oversized; the connection survives
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The frame could not be written
    #[error("send failed: {0}")]
    Send(String),

    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl TransportError {
    /// Whether the connection that produced this error is unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Protocol(_) | Self::FrameTooLarge { .. })
    }
}
