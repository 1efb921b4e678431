use crate::error::DecodeError;
use serde_json::value::RawValue;

/// A notification exactly as it arrived on the upstream link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub channel: String,
    pub payload: String,
}

impl RawNotification {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// A decoded unit of work: the channel it came from and its payload.
///
/// The payload is checked to be one well-formed JSON document but kept as the
/// original text, so key order and number spelling reach peers unchanged.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub channel: String,
    pub payload: Box<RawValue>,
}

impl NotificationEvent {
    pub fn decode(raw: RawNotification) -> Result<Self, DecodeError> {
        match serde_json::from_str::<Box<RawValue>>(&raw.payload) {
            Ok(payload) => Ok(Self {
                channel: raw.channel,
                payload,
            }),
            Err(source) => Err(DecodeError {
                channel: raw.channel,
                source,
            }),
        }
    }
}
