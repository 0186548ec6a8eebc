//! Action and status name constants.
//!
//! Each constant is the exact string sent over the wire. The status set is
//! open-ended: handlers may return any tag, these are the ones the core
//! itself produces or that operators commonly expect.

/// Action tags understood by the core.
pub struct Actions;

impl Actions {
    /// Keep-alive sent by the heartbeat loop; answered with [`Status::PONG`].
    pub const PING: &str = "ping";
}

/// Outcome tags carried in the `status` field of a response.
pub struct Status;

impl Status {
    pub const OK: &str = "ok";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
    pub const CLICKED: &str = "clicked";
    pub const NOT_FOUND: &str = "not_found";
}
