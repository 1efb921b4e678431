use super::gateway::{Inbound, PeerConnection};
use crate::error::PeerError;
use actix_ws::{Message, MessageStream, Session};
use async_trait::async_trait;
use futures::StreamExt;

/// actix-ws connection handed to the gateway after the upgrade.
pub struct WsPeer {
    session: Session,
    stream: MessageStream,
}

impl WsPeer {
    pub fn new(session: Session, stream: MessageStream) -> Self {
        Self { session, stream }
    }
}

#[async_trait(?Send)]
impl PeerConnection for WsPeer {
    async fn send_text(&mut self, text: String) -> Result<(), PeerError> {
        self.session.text(text).await.map_err(|_| PeerError::Closed)
    }

    async fn next_inbound(&mut self) -> Inbound {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Ping(bytes)) => return Inbound::Ping(bytes.to_vec()),
                Ok(Message::Close(reason)) => {
                    tracing::debug!(?reason, "WebSocket close frame received");
                    return Inbound::Closed;
                }
                // outbound-only channel: inbound payloads are ignored
                Ok(_) => {}
                Err(e) => return Inbound::Error(e.to_string()),
            }
        }
        Inbound::Closed
    }

    async fn pong(&mut self, payload: &[u8]) -> Result<(), PeerError> {
        self.session.pong(payload).await.map_err(|_| PeerError::Closed)
    }

    async fn close(&mut self) {
        if let Err(e) = self.session.clone().close(None).await {
            tracing::debug!(error = ?e, "WebSocket session already closed");
        }
    }
}
