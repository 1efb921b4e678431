//! Outbound WebSocket envelope
use serde::Serialize;
use serde_json::value::RawValue;

pub const CONNECTION_ESTABLISHED: &str = "CONNECTION_ESTABLISHED";

/// Message pushed from server to every connected peer.
///
/// Always serializes to exactly two top-level fields: `type` plus either
/// `data` (an upstream payload, verbatim) or `message` (the handshake).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BroadcastMessage {
    Event {
        #[serde(rename = "type")]
        event_type: String,
        data: Box<RawValue>,
    },
    Notice {
        #[serde(rename = "type")]
        event_type: String,
        message: String,
    },
}

impl BroadcastMessage {
    pub fn event(event_type: impl Into<String>, data: Box<RawValue>) -> Self {
        BroadcastMessage::Event {
            event_type: event_type.into(),
            data,
        }
    }

    /// Sent once to every peer right after it is registered.
    pub fn connection_established() -> Self {
        BroadcastMessage::Notice {
            event_type: CONNECTION_ESTABLISHED.to_string(),
            message: "Connected!".to_string(),
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            BroadcastMessage::Event { event_type, .. } | BroadcastMessage::Notice { event_type, .. } => {
                event_type
            }
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
