//! Application-level keep-alive.
//!
//! Sends `{"action":"ping"}` on a fixed interval for the lifetime of one
//! connection. The task ends by itself only when a send fails, which is how
//! the supervisor learns a half-open connection is dead.

use std::sync::Arc;
use std::time::Duration;

use tether_protocol::CommandMessage;
use tether_transport::{Transport, TransportError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Send pings on `conn` every `interval` until a send fails.
///
/// The first ping goes out immediately. A zero interval disables pinging and
/// the returned future never completes.
pub async fn heartbeat_loop<T: Transport>(conn: Arc<T>, interval: Duration) -> TransportError {
    if interval.is_zero() {
        return std::future::pending().await;
    }

    let frame = CommandMessage::ping().to_frame();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(e) = conn.send(frame.clone()).await {
            warn!("Heartbeat on {} failed: {e}", conn.id());
            return e;
        }
        debug!("Heartbeat sent on {}", conn.id());
    }
}

/// A running heartbeat task. Dropping the handle aborts the task.
pub struct HeartbeatHandle {
    task: JoinHandle<TransportError>,
    finished: bool,
}

impl HeartbeatHandle {
    pub fn spawn<T: Transport>(conn: Arc<T>, interval: Duration) -> Self {
        Self {
            task: tokio::spawn(heartbeat_loop(conn, interval)),
            finished: false,
        }
    }

    /// Resolves when the heartbeat gives up on its own.
    pub async fn stopped(&mut self) -> TransportError {
        let result = (&mut self.task).await;
        self.finished = true;
        match result {
            Ok(reason) => reason,
            Err(e) => TransportError::Closed(format!("heartbeat task ended: {e}")),
        }
    }

    /// Abort the task and wait for it to be gone. Does not wait for the
    /// current interval to elapse.
    pub async fn cancel(mut self) {
        if self.finished {
            return;
        }
        self.task.abort();
        let _ = (&mut self.task).await;
        self.finished = true;
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        // The owning session future may be dropped mid-await.
        self.task.abort();
    }
}
