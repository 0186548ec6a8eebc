//! Built-in actions.

use tether_protocol::{Actions, CommandMessage, CommandOutcome, HandlerResult, Status};

use crate::Action;

/// Answers `ping` with `pong`. No side effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingAction;

impl Action for PingAction {
    fn name(&self) -> &str {
        Actions::PING
    }

    async fn run(&self, _command: &CommandMessage) -> HandlerResult {
        Ok(CommandOutcome::new(Status::PONG))
    }
}
