//! Server-side WebSocket transport using Axum.
//!
//! Wraps an upgraded `WebSocket` so the relay can treat accepted sockets
//! exactly like any other `Transport`.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::{ConnectionInfo, Transport, TransportError, check_frame_size};

/// An accepted WebSocket connection.
pub struct ServerConnection {
    info: ConnectionInfo,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    closed: Notify,
    max_frame_size: usize,
    close_timeout: Duration,
}

impl ServerConnection {
    pub fn new(
        socket: WebSocket,
        address: impl Into<String>,
        max_frame_size: usize,
        close_timeout: Duration,
    ) -> Self {
        let (sink, stream) = socket.split();
        Self {
            info: ConnectionInfo::new(address),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: Notify::new(),
            max_frame_size,
            close_timeout,
        }
    }
}

impl Transport for ServerConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        check_frame_size(&frame, self.max_frame_size)?;
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
        if !self.info.is_open() {
            return Err(TransportError::Closed("closed locally".into()));
        }

        let mut stream = self.stream.lock().await;
        tokio::select! {
            result = self.next_frame(&mut stream) => result,
            _ = self.closed.notified() => Err(TransportError::Closed("closed locally".into())),
        }
    }

    async fn close(&self) {
        if !self.info.mark_closed() {
            return;
        }
        self.closed.notify_one();

        let mut sink = self.sink.lock().await;
        if tokio::time::timeout(self.close_timeout, sink.close()).await.is_err() {
            debug!("Close handshake with {} timed out", self.info.address);
        }
    }
}

impl ServerConnection {
    async fn next_frame(
        &self,
        stream: &mut SplitStream<WebSocket>,
    ) -> Result<String, TransportError> {
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
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => self.info.touch(),
                Some(Ok(Message::Close(frame))) => {
                    self.info.mark_closed();
                    return Err(TransportError::Closed(describe_close(frame)));
                }
                Some(Err(e)) => {
                    self.info.mark_closed();
                    return Err(TransportError::Closed(e.to_string()));
                }
                None => {
                    self.info.mark_closed();
                    return Err(TransportError::Closed("stream ended".into()));
                }
            }
        }
    }
}

fn describe_close(frame: Option<CloseFrame>) -> String {
    match frame {
        Some(frame) => format!("code={} reason={}", frame.code, frame.reason.as_str()),
        None => "no close frame".into(),
    }
}
