//! PeerSet — the relay's live membership.
//!
//! The only state shared between connection tasks. Each peer is reached
//! through a bounded outbound queue drained by that peer's writer task, so a
//! broadcast sweep never awaits a socket and never holds a lock across I/O.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// The relay's handle on one connected peer.
#[derive(Debug)]
pub struct PeerHandle {
    outbound: mpsc::Sender<String>,
    /// Remote socket address
    pub address: String,
    /// `deviceId` the peer announced when connecting
    pub label: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl PeerHandle {
    pub fn new(outbound: mpsc::Sender<String>, address: impl Into<String>, label: Option<String>) -> Self {
        Self {
            outbound,
            address: address.into(),
            label,
            connected_at: Utc::now(),
        }
    }
}

/// Public view of a peer, as served by `/peers`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub id: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// Result of one broadcast sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers the frame was queued for
    pub delivered: usize,
    /// Peers removed because their queue was closed or full
    pub pruned: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PeerSet {
    peers: DashMap<String, PeerHandle>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, handle: PeerHandle) {
        self.peers.insert(id.into(), handle);
    }

    /// Remove a peer. Removing an absent peer is a no-op; returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        self.peers.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Drop every peer. Their writer tasks see the queue close and hang up.
    pub fn clear(&self) {
        self.peers.clear();
    }

    pub fn summaries(&self) -> Vec<PeerSummary> {
        let mut summaries: Vec<PeerSummary> = self
            .peers
            .iter()
            .map(|entry| PeerSummary {
                id: entry.key().clone(),
                address: entry.value().address.clone(),
                label: entry.value().label.clone(),
                connected_at: entry.value().connected_at,
            })
            .collect();
        summaries.sort_by_key(|s| s.connected_at);
        summaries
    }

    /// Queue `frame` for every peer except `from`.
    ///
    /// Peers that cannot take the frame are collected during the sweep and
    /// removed once it is over.
    pub fn broadcast(&self, from: &str, frame: &str) -> BroadcastReport {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.peers.iter() {
            if entry.key() == from {
                continue;
            }
            match entry.value().outbound.try_send(frame.to_owned()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Peer {} is not keeping up, dropping it", entry.key());
                    dead.push(entry.key().clone());
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Peer {} has gone away", entry.key());
                    dead.push(entry.key().clone());
                }
            }
        }

        for id in &dead {
            self.peers.remove(id);
        }

        BroadcastReport {
            delivered,
            pruned: dead,
        }
    }
}
