//! Connection state tracking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

/// Identity and liveness of one connection.
#[derive(Debug)]
pub struct ConnectionInfo {
    /// Unique connection ID
    pub id: String,
    /// Remote address (URL on the client side, socket address on the server side)
    pub address: String,
    /// When the connection was established
    pub connected_at: Instant,
    /// Last time a frame was sent or received
    last_activity: Mutex<Instant>,
    closed: AtomicBool,
}

impl ConnectionInfo {
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), address)
    }

    pub fn with_id(id: impl Into<String>, address: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            address: address.into(),
            connected_at: now,
            last_activity: Mutex::new(now),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Mark closed. Returns `true` only for the call that performed the transition.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }
}
