//! TrackPeers: keeps the shared peer table in step with discovery.
//!
//! Discovery runs on its own thread and produces add/update/remove events.
//! Those events are funnelled through a single mpsc channel into
//! [`run_peer_updates`], the only writer of the [`PeerDirectory`].  Readers
//! (the sender, the CLI) take short-lived locks to snapshot or resolve peers.
//!
//! ```text
//! discovery thread ──► mpsc ──► run_peer_updates ──► PeerDirectory
//!                                                        ▲
//!                                   Sender / CLI ────────┘ (snapshot, find)
//! ```

use std::sync::Arc;

use anonbox_core::{PeerId, PeerRecord, PeerRegistry};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

/// A change to apply to the peer table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerUpdate {
    /// A peer was discovered or re-announced with new details.
    Upsert(PeerRecord),
    /// A peer went away (goodbye or expiry).
    Remove { discovery_name: String },
}

/// Shared, lock-protected handle to the [`PeerRegistry`].
///
/// Cloning is cheap; every clone refers to the same table.
#[derive(Clone, Debug)]
pub struct PeerDirectory {
    inner: Arc<Mutex<PeerRegistry>>,
}

impl PeerDirectory {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PeerRegistry::new(local_id))),
        }
    }

    /// Inserts or replaces a record.  Returns `false` for the local node's
    /// own advertisement.
    pub async fn upsert(&self, record: PeerRecord) -> bool {
        self.inner.lock().await.upsert(record)
    }

    pub async fn remove(&self, discovery_name: &str) -> Option<PeerRecord> {
        self.inner.lock().await.remove(discovery_name)
    }

    /// Copy of all peers in discovery-name order.
    pub async fn snapshot(&self) -> Vec<PeerRecord> {
        self.inner.lock().await.snapshot()
    }

    /// Resolves `token` to a peer; see [`PeerRegistry::find`].
    pub async fn find(&self, token: &str) -> Option<PeerRecord> {
        self.inner.lock().await.find(token).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }

    /// Applies one update, logging joins and departures.
    pub async fn apply(&self, update: PeerUpdate) {
        match update {
            PeerUpdate::Upsert(record) => {
                let name = record.discovery_name.clone();
                let user = record.username.clone();
                if self.upsert(record).await {
                    info!("peer available: {user} ({name})");
                } else {
                    debug!("ignoring own advertisement {name}");
                }
            }
            PeerUpdate::Remove { discovery_name } => {
                if let Some(record) = self.remove(&discovery_name).await {
                    info!("peer left: {} ({discovery_name})", record.username);
                }
            }
        }
    }
}

/// Drains `rx` into `directory` until every sender is dropped.
///
/// This is the single consumer of discovery events; spawn it once per node.
pub async fn run_peer_updates<E>(mut rx: mpsc::Receiver<E>, directory: PeerDirectory)
where
    E: Into<PeerUpdate>,
{
    while let Some(event) = rx.recv().await {
        directory.apply(event.into()).await;
    }
    debug!("peer update channel closed");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
