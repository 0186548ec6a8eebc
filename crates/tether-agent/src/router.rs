//! Action router — dispatches commands to registered actions by tag.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tether_protocol::{CommandMessage, HandlerError, HandlerResult};
use tether_transport::ConnectionInfo;
use tracing::{debug, info};

use crate::actions::PingAction;
use crate::{Action, CommandHandler};

/// Owns the registered actions and routes each command to one of them.
pub struct ActionRouter {
    actions: HashMap<String, Box<dyn ActionDyn>>,
}

/// Object-safe wrapper for the Action trait.
trait ActionDyn: Send + Sync {
    fn name_dyn(&self) -> &str;
    fn run_dyn<'a>(
        &'a self,
        command: &'a CommandMessage,
    ) -> Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;
}

impl<T: Action> ActionDyn for T {
    fn name_dyn(&self) -> &str {
        self.name()
    }

    fn run_dyn<'a>(
        &'a self,
        command: &'a CommandMessage,
    ) -> Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>> {
        Box::pin(self.run(command))
    }
}

impl ActionRouter {
    /// An empty router. Every command is answered with an error.
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// A router with the built-in actions (`ping`) registered.
    pub fn with_defaults() -> Self {
        let mut router = Self::new();
        router.register(PingAction);
        router
    }

    /// Register an action. A later registration for the same tag replaces
    /// the earlier one.
    pub fn register<A: Action + 'static>(&mut self, action: A) {
        info!("Registering action: {}", action.name());
        self.actions.insert(action.name().to_string(), Box::new(action));
    }

    pub fn actions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.values().map(|a| a.name_dyn()).collect();
        names.sort_unstable();
        names
    }

    async fn route(&self, command: &CommandMessage) -> HandlerResult {
        let Some(name) = command.action() else {
            return Err(HandlerError::missing_action());
        };

        match self.actions.get(name) {
            Some(action) => action.run_dyn(command).await,
            None => Err(HandlerError::unknown_action(name)),
        }
    }
}

impl Default for ActionRouter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CommandHandler for ActionRouter {
    async fn handle(&self, command: &CommandMessage, connection: &ConnectionInfo) -> HandlerResult {
        debug!(
            "Dispatching {} from {} on {}",
            command.action().unwrap_or("-"),
            command.sender.as_deref().unwrap_or("-"),
            connection.id
        );
        self.route(command).await
    }
}
