//! Registry of live connections to transfer nodes.
//!
//! One registry is owned per connector and shared with every session via
//! `Arc`. Sessions add their link after the greet is sent and remove it when
//! the connection ends.
//!
//! Links live behind a `std::sync::RwLock` because sessions unregister from
//! `Drop`; no lock is held across an `.await`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use imlink_core::{ImError, ImResult, TransferMessage};

/// Handle to one live transfer connection.
///
/// Cloning is cheap; messages sent through any clone are written by the
/// owning session's writer in submission order.
#[derive(Debug, Clone)]
pub struct TransferLink {
    id: u64,
    peer: String,
    tx: mpsc::Sender<TransferMessage>,
}

impl TransferLink {
    pub fn new(id: u64, peer: impl Into<String>, tx: mpsc::Sender<TransferMessage>) -> Self {
        Self {
            id,
            peer: peer.into(),
            tx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote address (or label) of the transfer node.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue a message for the transfer node.
    pub async fn send(&self, msg: TransferMessage) -> ImResult<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| ImError::Transport(format!("link {} to {} is closed", self.id, self.peer)))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    links: RwLock<Vec<TransferLink>>,
    next_link_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            links: RwLock::new(Vec::new()),
            next_link_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id for a link about to be registered.
    pub fn next_link_id(&self) -> u64 {
        self.next_link_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(&self, link: TransferLink) {
        info!(link_id = link.id, peer = %link.peer, "transfer link registered");
        self.links
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(link);
    }

    /// Remove a link by id. Returns whether it was present.
    pub fn unregister(&self, link_id: u64) -> bool {
        let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
        let before = links.len();
        links.retain(|l| l.id != link_id);
        let removed = links.len() != before;
        if removed {
            debug!(link_id, remaining = links.len(), "transfer link unregistered");
        }
        removed
    }

    /// Snapshot of all live links; fails fast when there are none.
    pub fn list(&self) -> ImResult<Vec<TransferLink>> {
        let links = self.links.read().unwrap_or_else(|e| e.into_inner());
        if links.is_empty() {
            return Err(ImError::NotConnected);
        }
        Ok(links.clone())
    }

    pub fn len(&self) -> usize {
        self.links.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
