//! Per-connection relay loop.

use std::sync::Arc;

use tether_transport::Transport;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::peers::{BroadcastReport, PeerHandle, PeerSet};

/// Accepts connections into the peer set and fans their frames out.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    peers: Arc<PeerSet>,
    send_buffer: usize,
}

impl Broadcaster {
    /// `send_buffer` bounds how many frames may queue for one slow peer
    /// before it is dropped.
    pub fn new(send_buffer: usize) -> Self {
        Self {
            peers: Arc::new(PeerSet::new()),
            send_buffer: send_buffer.max(1),
        }
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    /// Serve one connection until it closes. The peer is registered for the
    /// whole call and always removed before it returns.
    pub async fn serve<T: Transport>(&self, conn: T, label: Option<String>) {
        let conn = Arc::new(conn);
        let id = conn.id().to_string();

        let (tx, rx) = mpsc::channel(self.send_buffer);
        self.peers
            .insert(id.clone(), PeerHandle::new(tx, conn.info().address.clone(), label.clone()));
        info!(
            "Peer connected: {id} from {} (device: {}, total: {})",
            conn.info().address,
            label.as_deref().unwrap_or("-"),
            self.peers.len()
        );

        let writer = tokio::spawn(write_loop(conn.clone(), rx));

        loop {
            match conn.receive().await {
                Ok(frame) => {
                    self.relay(&id, &frame);
                }
                Err(e) if !e.is_fatal() => warn!("Dropping frame from {id}: {e}"),
                Err(e) => {
                    debug!("Peer {id} receive ended: {e}");
                    break;
                }
            }
        }

        self.peers.remove(&id);
        writer.abort();
        let _ = writer.await;
        conn.close().await;
        info!("Peer disconnected: {id} (total: {})", self.peers.len());
    }

    /// Forward one frame from `from` to every other peer.
    ///
    /// The frame is parsed only to log it; malformed JSON is forwarded as is.
    pub fn relay(&self, from: &str, frame: &str) -> BroadcastReport {
        match serde_json::from_str::<serde_json::Value>(frame) {
            Ok(command) => debug!("Relaying from {from}: {command}"),
            Err(e) => warn!("Invalid JSON from {from}, forwarding raw: {e}"),
        }

        let report = self.peers.broadcast(from, frame);
        if !report.pruned.is_empty() {
            info!("Pruned {} dead peer(s): {:?}", report.pruned.len(), report.pruned);
        }
        report
    }
}

/// Drain a peer's outbound queue onto its connection.
async fn write_loop<T: Transport>(conn: Arc<T>, mut rx: mpsc::Receiver<String>) {
    while let Some(frame) = rx.recv().await {
        match conn.send(frame).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                warn!("Send to {} failed: {e}", conn.id());
                break;
            }
            Err(e) => warn!("Frame to {} dropped: {e}", conn.id()),
        }
    }
    // Queue closed (peer pruned) or socket dead: hang up so the read side ends too.
    conn.close().await;
}
