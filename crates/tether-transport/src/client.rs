//! WebSocket client transport using tokio-tungstenite.
//!
//! Supports `ws://` and `wss://` endpoints. The socket is split into a sink
//! and a stream, each behind its own lock, so the heartbeat can send while
//! the receive loop is parked waiting for the next frame.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tracing::{debug, warn};

use crate::{
    ConnectionInfo, Connector, DEFAULT_MAX_FRAME_SIZE, Transport, TransportError, check_frame_size,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client transport configuration.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Largest frame accepted or sent, in bytes
    pub max_frame_size: usize,
    /// Upper bound on the TCP + TLS + upgrade handshake
    pub connect_timeout: Duration,
    /// Upper bound on the closing handshake
    pub close_timeout: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Opens [`WsConnection`]s.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    config: WsConfig,
}

impl WsConnector {
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }
}

impl Connector for WsConnector {
    type Connection = WsConnection;

    async fn connect(&self, address: &str) -> Result<WsConnection, TransportError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_frame_size);
        ws_config.max_frame_size = Some(self.config.max_frame_size);

        let handshake = connect_async_with_config(address, Some(ws_config), false);
        let (stream, response) = tokio::time::timeout(self.config.connect_timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "connect",
                after: self.config.connect_timeout,
            })?
            .map_err(|e| TransportError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        debug!("WebSocket upgrade to {address} completed ({})", response.status());
        Ok(WsConnection::new(stream, address, self.config.clone()))
    }
}

/// A client-side WebSocket connection.
pub struct WsConnection {
    info: ConnectionInfo,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    config: WsConfig,
}

impl WsConnection {
    fn new(stream: WsStream, address: &str, config: WsConfig) -> Self {
        let (sink, stream) = stream.split();
        Self {
            info: ConnectionInfo::new(address),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            config,
        }
    }
}

impl Transport for WsConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        check_frame_size(&frame, self.config.max_frame_size)?;
        if !self.info.is_open() {
            return Err(TransportError::Send("connection is closed".into()));
        }

        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.info.touch();
        Ok(())
    }

    async fn receive(&self) -> Result<String, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.info.touch();
                    return Ok(text.as_str().to_owned());
                }
                Some(Ok(Message::Binary(data))) => {
                    self.info.touch();
                    return String::from_utf8(data.to_vec()).map_err(|_| {
                        TransportError::Protocol("binary frame is not valid UTF-8".into())
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    self.info.mark_closed();
                    return Err(TransportError::Closed(describe_close(frame)));
                }
                // Control frames; tungstenite answers pings itself.
                Some(Ok(_)) => self.info.touch(),
                Some(Err(e)) => {
                    self.info.mark_closed();
                    return Err(map_ws_error(e));
                }
                None => {
                    self.info.mark_closed();
                    return Err(TransportError::Closed("stream ended".into()));
                }
            }
        }
    }

    async fn close(&self) {
        if !self.info.mark_closed() {
            return;
        }

        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.config.close_timeout, sink.close()).await {
            Ok(Ok(())) => debug!("Closed connection to {}", self.info.address),
            Ok(Err(e)) => debug!("Close handshake with {} failed: {e}", self.info.address),
            Err(_) => warn!(
                "Close handshake with {} timed out after {:?}",
                self.info.address, self.config.close_timeout
            ),
        }
    }
}

fn describe_close(frame: Option<CloseFrame>) -> String {
    match frame {
        Some(frame) if frame.reason.is_empty() => format!("code={}", frame.code),
        Some(frame) => format!("code={} reason={}", frame.code, frame.reason.as_str()),
        None => "no close frame".into(),
    }
}

/// Every read error ends the stream; tungstenite does not resume after one.
fn map_ws_error(error: WsError) -> TransportError {
    match error {
        WsError::Capacity(e) => {
            TransportError::Closed(format!("inbound frame exceeds size limit: {e}"))
        }
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TransportError::Closed("connection already closed".into())
        }
        other => TransportError::Closed(other.to_string()),
    }
}
