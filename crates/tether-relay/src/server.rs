//! Relay server using Axum.
//!
//! Accepts WebSocket upgrades on `/` and `/ws` and hands each socket to the
//! [`Broadcaster`]. `GET /health` and `GET /peers` report on the peer set.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{ConnectInfo, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tether_transport::{DEFAULT_MAX_FRAME_SIZE, ServerConnection};
use tokio::sync::{Semaphore, mpsc};
use tracing::{info, warn};

use crate::broadcaster::Broadcaster;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Hostname to bind to
    pub hostname: String,
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Largest frame accepted from or sent to a peer
    pub max_frame_size: usize,
    /// Maximum concurrent peers; `None` is unbounded
    pub max_connections: Option<usize>,
    /// Frames that may queue for one peer before it is pruned
    pub send_buffer: usize,
    /// How long to wait for a close handshake
    pub close_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            hostname: "0.0.0.0".into(),
            port: 8080,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_connections: None,
            send_buffer: 256,
            close_timeout: Duration::from_secs(5),
        }
    }
}

struct AppState {
    broadcaster: Broadcaster,
    config: RelayConfig,
    /// One permit per allowed peer, held from upgrade until disconnect
    slots: Option<Arc<Semaphore>>,
}

/// A running relay.
pub struct RelayServer {
    broadcaster: Broadcaster,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl RelayServer {
    /// Bind the listener and start serving in the background.
    pub async fn start(config: RelayConfig) -> Result<Self, RelayError> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let broadcaster = Broadcaster::new(config.send_buffer);

        let state = Arc::new(AppState {
            broadcaster: broadcaster.clone(),
            config: config.clone(),
            slots: config
                .max_connections
                .map(|max| Arc::new(Semaphore::new(max))),
        });

        let app = Router::new()
            .route("/", get(ws_upgrade_handler))
            .route("/ws", get(ws_upgrade_handler))
            .route("/health", get(health_handler))
            .route("/peers", get(peers_handler))
            .with_state(state);

        let address = format!("{}:{}", config.hostname, config.port);
        let listener = tokio::net::TcpListener::bind((config.hostname.as_str(), config.port))
            .await
            .map_err(|source| RelayError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| RelayError::Bind { address, source })?;

        info!("Tether relay listening on ws://{local_addr}/");

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .ok();
        });

        Ok(Self {
            broadcaster,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            local_addr,
        })
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.broadcaster.peers().len()
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Disconnect every peer and stop accepting connections.
    pub async fn stop(&mut self) {
        self.broadcaster.peers().clear();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Tether relay stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    #[serde(rename = "deviceId")]
    device_id: Option<String>,
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(query): Query<ConnectQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let permit = match &state.slots {
        Some(slots) => match slots.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                let max = state.config.max_connections.unwrap_or_default();
                warn!("Connection from {remote} rejected: max connections reached ({max})");
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
        },
        None => None,
    };

    let max_frame_size = state.config.max_frame_size;
    ws.max_message_size(max_frame_size)
        .max_frame_size(max_frame_size)
        .on_upgrade(move |socket| async move {
            let conn = ServerConnection::new(
                socket,
                remote.to_string(),
                max_frame_size,
                state.config.close_timeout,
            );
            state.broadcaster.serve(conn, query.device_id).await;
            drop(permit);
        })
        .into_response()
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "peers": state.broadcaster.peers().len(),
    }))
}

async fn peers_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.broadcaster.peers().summaries())
}
