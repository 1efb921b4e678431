use std::time::Duration;
use thiserror::Error;

/// Process-level failures: the only errors that ever reach `main`.
#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),
}

/// Failures of the upstream subscription link.
///
/// Every variant takes the same recovery path (tear down, wait, reconnect);
/// the variants only exist so logs and metrics can tell them apart.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("LISTEN {channel} failed: {reason}")]
    Subscribe { channel: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream link terminated")]
    Terminated,

    #[error("keepalive probe failed: {0}")]
    Keepalive(String),

    #[error("reconnect requested")]
    ReconnectRequested,
}

impl LinkError {
    /// Short label used for the reconnect metric.
    pub fn reason(&self) -> &'static str {
        match self {
            LinkError::Connect(_) => "connect",
            LinkError::ConnectTimeout(_) => "connect_timeout",
            LinkError::Subscribe { .. } => "subscribe",
            LinkError::Transport(_) => "transport",
            LinkError::Terminated => "terminated",
            LinkError::Keepalive(_) => "keepalive",
            LinkError::ReconnectRequested => "requested",
        }
    }
}

/// Malformed upstream payload. Local to a single notification.
#[derive(Debug, Error)]
#[error("malformed payload on channel {channel}: {source}")]
pub struct DecodeError {
    pub channel: String,
    #[source]
    pub source: serde_json::Error,
}

/// Delivery failure for a single downstream peer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PeerError {
    #[error("peer connection closed")]
    Closed,

    #[error("peer outbound queue full")]
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_labels() {
        assert_eq!(LinkError::Keepalive("timeout".into()).reason(), "keepalive");
        assert_eq!(LinkError::ConnectTimeout(Duration::from_secs(10)).reason(), "connect_timeout");
        assert_eq!(LinkError::Terminated.reason(), "terminated");
    }

    #[test]
    fn test_subscribe_error_message() {
        let err = LinkError::Subscribe {
            channel: "comments_channel".into(),
            reason: "permission denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "LISTEN comments_channel failed: permission denied"
        );
    }
}
