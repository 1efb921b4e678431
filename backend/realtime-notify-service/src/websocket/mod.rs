/// Downstream side of the service: the live peer set and the gateway that
/// feeds it.
///
/// Architecture:
/// 1. ConnectionRegistry: owns every admitted peer's outbound sender
/// 2. Gateway: admits upgraded connections and removes them on termination
/// 3. WsPeer: actix-ws adapter the gateway drives
use crate::error::PeerError;
use crate::metrics;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    RwLock,
};
use uuid::Uuid;

pub mod gateway;
pub mod messages;
pub mod session;

pub use gateway::{Gateway, Inbound, PeerConnection};
pub use messages::BroadcastMessage;
pub use session::WsPeer;

/// Unique identifier for a downstream peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Open,
    Closing,
    Closed,
}

/// Shared "closing" marker for one peer, raised by the gateway.
#[derive(Debug, Clone, Default)]
pub struct ClosingFlag(Arc<AtomicBool>);

impl ClosingFlag {
    pub fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Registry-side handle of one peer: its bounded outbound queue plus the
/// closing flag the gateway raises when the transport reports close/error.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: PeerId,
    sender: mpsc::Sender<String>,
    closing: ClosingFlag,
}

impl PeerHandle {
    /// Creates a handle and the receiving end of its outbound queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: PeerId::new(),
            sender,
            closing: ClosingFlag::default(),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn state(&self) -> PeerState {
        if self.sender.is_closed() {
            PeerState::Closed
        } else if self.closing.is_set() {
            PeerState::Closing
        } else {
            PeerState::Open
        }
    }

    pub fn is_live(&self) -> bool {
        self.state() == PeerState::Open
    }

    pub fn mark_closing(&self) {
        self.closing.mark();
    }

    /// The closing flag alone, without keeping the outbound queue open.
    pub fn closing_flag(&self) -> ClosingFlag {
        self.closing.clone()
    }

    /// Non-blocking enqueue. A full queue means the peer is not keeping up.
    pub fn try_deliver(&self, text: String) -> Result<(), PeerError> {
        self.sender.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => PeerError::Full,
            TrySendError::Closed(_) => PeerError::Closed,
        })
    }
}

/// Connection registry for downstream peers
///
/// A peer is present iff it may receive broadcasts. Removal is idempotent and
/// may race freely with an in-progress broadcast.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<PeerId, PeerHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a peer. Returns `false` if it was already present.
    pub async fn admit(&self, peer: PeerHandle) -> bool {
        let mut guard = self.inner.write().await;
        let id = peer.id();
        let inserted = match guard.entry(id) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(peer);
                true
            }
        };
        metrics::set_connected_peers(guard.len());

        if inserted {
            tracing::debug!(peer = %id, total = guard.len(), "admitted peer");
        }
        inserted
    }

    /// Remove a peer. Absent peers are a no-op.
    pub async fn remove(&self, id: PeerId) -> bool {
        let mut guard = self.inner.write().await;
        let removed = guard.remove(&id).is_some();
        metrics::set_connected_peers(guard.len());

        if removed {
            tracing::debug!(peer = %id, remaining = guard.len(), "removed peer");
        }
        removed
    }

    /// Broadcast a message to every live peer.
    ///
    /// Serializes once, snapshots the peer set, enqueues without waiting and
    /// evicts every peer that failed its liveness check or its enqueue.
    /// Returns how many peers the message was handed to.
    pub async fn broadcast(&self, message: &BroadcastMessage) -> usize {
        match message.to_json() {
            Ok(text) => self.broadcast_text(text).await,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize broadcast message");
                0
            }
        }
    }

    pub async fn broadcast_text(&self, text: String) -> usize {
        let snapshot: Vec<PeerHandle> = {
            let guard = self.inner.read().await;
            guard.values().cloned().collect()
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for peer in &snapshot {
            if !peer.is_live() {
                dead.push(peer.id());
                continue;
            }
            match peer.try_deliver(text.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(peer = %peer.id(), error = %e, "evicting peer");
                    dead.push(peer.id());
                }
            }
        }
        drop(snapshot);

        if !dead.is_empty() {
            let mut guard = self.inner.write().await;
            let before = guard.len();
            for id in &dead {
                guard.remove(id);
            }
            let evicted = before - guard.len();
            metrics::set_connected_peers(guard.len());
            metrics::record_evictions(evicted);
            tracing::debug!(evicted, active = guard.len(), "cleaned up dead peers after broadcast");
        }

        metrics::record_deliveries(delivered);
        delivered
    }

    pub async fn contains(&self, id: PeerId) -> bool {
        self.inner.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Drop every peer. Their gateway tasks observe the closed queue and close
    /// the transport.
    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        guard.clear();
        metrics::set_connected_peers(0);
    }
}
