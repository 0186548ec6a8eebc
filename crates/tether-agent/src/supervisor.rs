//! Reconnection supervisor.
//!
//! ```text
//! Connecting --ok--> Connected --loop ended--> Disconnected --slept--> Connecting
//!      \                                            ^
//!       `------------------connect failed-----------'
//! ```
//!
//! There is no terminal state. [`Supervisor::step`] performs exactly one
//! transition so tests can drive the machine; [`Supervisor::run`] steps
//! forever.

use std::sync::Arc;
use std::time::Duration;

use tether_transport::{Connector, Transport, TransportError};
use tracing::{info, warn};

use crate::backoff::{Backoff, Sleeper, TokioSleeper};
use crate::config::AgentConfig;
use crate::heartbeat::HeartbeatHandle;
use crate::receiver::receive_loop;
use crate::CommandHandler;

/// Observable supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What a single [`Supervisor::step`] did.
#[derive(Debug)]
pub enum Transition {
    /// `Connecting -> Connected`
    Connected { connection_id: String },
    /// `Connecting -> Disconnected`
    ConnectFailed(TransportError),
    /// `Connected -> Disconnected`, with the error that ended the session
    SessionEnded(TransportError),
    /// `Disconnected -> Connecting`, after waiting this long
    Waited(Duration),
}

enum State<T> {
    Disconnected,
    Connecting,
    Connected(Arc<T>),
}

pub struct Supervisor<C: Connector, H: CommandHandler, S: Sleeper = TokioSleeper> {
    connector: C,
    handler: Arc<H>,
    sleeper: S,
    config: AgentConfig,
    backoff: Backoff,
    state: State<C::Connection>,
}

impl<C: Connector, H: CommandHandler> Supervisor<C, H, TokioSleeper> {
    pub fn new(connector: C, handler: H, config: AgentConfig) -> Self {
        Self::with_sleeper(connector, handler, TokioSleeper, config)
    }
}

impl<C: Connector, H: CommandHandler, S: Sleeper> Supervisor<C, H, S> {
    pub fn with_sleeper(connector: C, handler: H, sleeper: S, config: AgentConfig) -> Self {
        let backoff = Backoff::new(config.backoff_floor, config.backoff_ceiling, config.jitter);
        Self {
            connector,
            handler: Arc::new(handler),
            sleeper,
            config,
            backoff,
            state: State::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.state {
            State::Disconnected => ConnectionState::Disconnected,
            State::Connecting => ConnectionState::Connecting,
            State::Connected(_) => ConnectionState::Connected,
        }
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Keep the link up until the process exits.
    pub async fn run(mut self) {
        info!("Agent supervisor starting for {}", self.config.endpoint());
        loop {
            self.step().await;
        }
    }

    /// Perform one state transition.
    pub async fn step(&mut self) -> Transition {
        match std::mem::replace(&mut self.state, State::Disconnected) {
            State::Connecting => self.connect().await,
            State::Connected(conn) => {
                let reason = self.run_session(conn).await;
                info!("Disconnected: {reason}");
                Transition::SessionEnded(reason)
            }
            State::Disconnected => {
                let delay = self.backoff.next_delay();
                info!("Reconnecting in {delay:?}");
                self.sleeper.sleep(delay).await;
                self.state = State::Connecting;
                Transition::Waited(delay)
            }
        }
    }

    async fn connect(&mut self) -> Transition {
        let endpoint = self.config.endpoint();
        match self.connector.connect(&endpoint).await {
            Ok(conn) => {
                let connection_id = conn.id().to_string();
                info!("Connected: {endpoint} ({connection_id})");
                self.backoff.reset();
                self.state = State::Connected(Arc::new(conn));
                Transition::Connected { connection_id }
            }
            Err(e) => {
                warn!("Connect to {endpoint} failed: {e}");
                Transition::ConnectFailed(e)
            }
        }
    }

    /// Run heartbeat and receive loop until either ends, then tear both down.
    async fn run_session(&self, conn: Arc<C::Connection>) -> TransportError {
        let mut heartbeat = HeartbeatHandle::spawn(conn.clone(), self.config.heartbeat_interval);

        let reason = tokio::select! {
            reason = heartbeat.stopped() => reason,
            reason = receive_loop(conn.as_ref(), self.handler.as_ref()) => reason,
        };

        heartbeat.cancel().await;
        conn.close().await;
        reason
    }
}
