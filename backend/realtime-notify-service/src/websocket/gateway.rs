//! Admission of upgraded downstream connections
//!
//! The HTTP layer hands over an already-negotiated connection; from then on
//! the gateway owns its lifecycle:
//! - queue the handshake, then admit the peer (handshake always comes first)
//! - pump the peer's outbound queue into the transport
//! - on close/error/eviction: remove from the registry and close the transport

use super::{BroadcastMessage, ConnectionRegistry, PeerHandle};
use crate::error::PeerError;
use async_trait::async_trait;

/// What the inbound side of a connection produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A ping that still needs its pong.
    Ping(Vec<u8>),
    /// The peer sent a close frame or the stream ended.
    Closed,
    /// The transport reported a protocol or I/O error.
    Error(String),
}

/// An upgraded, bidirectional peer connection.
///
/// `?Send` because actix-ws sessions live on a single-threaded arbiter.
#[async_trait(?Send)]
pub trait PeerConnection {
    async fn send_text(&mut self, text: String) -> Result<(), PeerError>;

    /// Next inbound frame the gateway must act on. Other traffic is consumed
    /// without interpretation.
    ///
    /// Must be cancel-safe: it races the outbound queue and is dropped
    /// whenever a broadcast wins.
    async fn next_inbound(&mut self) -> Inbound;

    async fn pong(&mut self, payload: &[u8]) -> Result<(), PeerError>;

    async fn close(&mut self);
}

#[derive(Clone)]
pub struct Gateway {
    registry: ConnectionRegistry,
    peer_buffer: usize,
}

impl Gateway {
    pub fn new(registry: ConnectionRegistry, peer_buffer: usize) -> Self {
        Self {
            registry,
            peer_buffer,
        }
    }

    /// Drive one peer from admission to removal.
    pub async fn serve<C: PeerConnection>(&self, mut conn: C) {
        let (peer, mut outbound) = PeerHandle::channel(self.peer_buffer);
        let id = peer.id();
        let closing = peer.closing_flag();

        match BroadcastMessage::connection_established().to_json() {
            Ok(handshake) => {
                if let Err(e) = peer.try_deliver(handshake) {
                    tracing::warn!(peer = %id, error = %e, "failed to queue handshake");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize handshake"),
        }

        // Registry now holds the only sender: eviction closes `outbound`.
        self.registry.admit(peer).await;
        tracing::info!(peer = %id, "peer connected");

        loop {
            tokio::select! {
                next = outbound.recv() => match next {
                    Some(text) => {
                        if let Err(e) = conn.send_text(text).await {
                            tracing::debug!(peer = %id, error = %e, "send failed");
                            break;
                        }
                    }
                    None => {
                        tracing::debug!(peer = %id, "peer evicted from registry");
                        break;
                    }
                },
                inbound = conn.next_inbound() => match inbound {
                    // answered here, outside the raced future, so a broadcast
                    // can't cancel it halfway
                    Inbound::Ping(payload) => {
                        if let Err(e) = conn.pong(&payload).await {
                            tracing::debug!(peer = %id, error = %e, "pong failed");
                            break;
                        }
                    }
                    Inbound::Closed => {
                        tracing::debug!(peer = %id, "peer closed connection");
                        break;
                    }
                    Inbound::Error(e) => {
                        tracing::warn!(peer = %id, error = %e, "peer transport error");
                        break;
                    }
                },
            }
        }

        closing.mark();
        self.registry.remove(id).await;
        conn.close().await;
        tracing::info!(peer = %id, "peer disconnected");
    }
}
