//! Tether Agent
//!
//! The client side of the link. A [`Supervisor`] owns the connection to the
//! relay and keeps it alive forever: connect, run the heartbeat and the
//! receive loop side by side until either ends, back off, reconnect.
//!
//! Inbound commands are dispatched to a [`CommandHandler`]. The stock
//! handler is the [`ActionRouter`], which looks up an [`Action`] by the
//! command's `action` tag.

pub mod actions;
pub mod backoff;
pub mod config;
pub mod heartbeat;
pub mod receiver;
pub mod router;
pub mod supervisor;

use std::future::Future;

use tether_protocol::{CommandMessage, HandlerResult};
use tether_transport::ConnectionInfo;

pub use actions::PingAction;
pub use backoff::{Backoff, Sleeper, TokioSleeper};
pub use config::AgentConfig;
pub use heartbeat::HeartbeatHandle;
pub use receiver::{build_response, process_frame, receive_loop};
pub use router::ActionRouter;
pub use supervisor::{ConnectionState, Supervisor, Transition};

/// Executes decoded commands.
///
/// Implementations report every failure through the returned `HandlerResult`;
/// a panic is caught by the receive loop and reported the same way.
pub trait CommandHandler: Send + Sync + 'static {
    /// Handle one command received on `connection`.
    fn handle(
        &self,
        command: &CommandMessage,
        connection: &ConnectionInfo,
    ) -> impl Future<Output = HandlerResult> + Send;
}

/// A single named action registered with the [`ActionRouter`].
pub trait Action: Send + Sync {
    /// The `action` tag this handler answers (e.g. "ping").
    fn name(&self) -> &str;

    /// Run the action for one command.
    fn run(&self, command: &CommandMessage) -> impl Future<Output = HandlerResult> + Send;
}
