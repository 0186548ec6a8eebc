//! In-process transport pair.
//!
//! Two `MemoryConnection`s wired back to back with unbounded channels. Used by
//! the agent and relay test suites to exercise the loops without sockets.

use tokio::sync::{Mutex, Notify, mpsc};

use crate::{ConnectionInfo, DEFAULT_MAX_FRAME_SIZE, Transport, TransportError, check_frame_size};

/// One end of an in-memory duplex channel.
pub struct MemoryConnection {
    info: ConnectionInfo,
    outbound: parking_lot::Mutex<Option<mpsc::UnboundedSender<String>>>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: Notify,
    max_frame_size: usize,
}

/// Create a connected pair. Frames sent on one end are received on the other.
pub fn pair(left: &str, right: &str) -> (MemoryConnection, MemoryConnection) {
    let (left_tx, right_rx) = mpsc::unbounded_channel();
    let (right_tx, left_rx) = mpsc::unbounded_channel();
    (
        MemoryConnection::new(left, right, left_tx, left_rx),
        MemoryConnection::new(right, left, right_tx, right_rx),
    )
}

impl MemoryConnection {
    fn new(
        id: &str,
        peer: &str,
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            info: ConnectionInfo::with_id(id, format!("memory://{peer}")),
            outbound: parking_lot::Mutex::new(Some(outbound)),
            inbound: Mutex::new(inbound),
            closed: Notify::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

impl Transport for MemoryConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        check_frame_size(&frame, self.max_frame_size)?;
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return Err(TransportError::Send("connection is closed".into()));
        };
        tx.send(frame)
            .map_err(|_| TransportError::Send("peer has gone away".into()))?;
        self.info.touch();
        Ok(())
    }

    async fn receive(&self) -> Result<String, TransportError> {
        if !self.info.is_open() {
            return Err(TransportError::Closed("closed locally".into()));
        }

        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            frame = inbound.recv() => match frame {
                Some(frame) => {
                    self.info.touch();
                    Ok(frame)
                }
                None => {
                    self.info.mark_closed();
                    Err(TransportError::Closed("peer closed".into()))
                }
            },
            _ = self.closed.notified() => Err(TransportError::Closed("closed locally".into())),
        }
    }

    async fn close(&self) {
        if !self.info.mark_closed() {
            return;
        }
        self.outbound.lock().take();
        self.closed.notify_one();
    }
}
