use crate::metrics;
use crate::models::{NotificationEvent, RawNotification};
use crate::services::subscription::NotificationHandler;
use crate::websocket::{BroadcastMessage, ConnectionRegistry};
use async_trait::async_trait;
use std::collections::HashMap;

/// Channel name → outbound event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTypeTable {
    entries: HashMap<String, String>,
}

impl Default for EventTypeTable {
    fn default() -> Self {
        Self::from_pairs([
            ("comments_channel", "NEW_COMMENT"),
            ("messages_channel", "NEW_MESSAGE"),
        ])
    }
}

impl EventTypeTable {
    fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn from_pairs<I, C, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (C, T)>,
        C: Into<String>,
        T: Into<String>,
    {
        let mut table = Self::empty();
        for (channel, event_type) in pairs {
            table.insert(channel, event_type);
        }
        table
    }

    /// Adds or replaces the mapping for `channel`.
    pub fn insert(&mut self, channel: impl Into<String>, event_type: impl Into<String>) {
        self.entries.insert(channel.into(), event_type.into());
    }

    pub fn lookup(&self, channel: &str) -> Option<&str> {
        self.entries.get(channel).map(String::as_str)
    }
}

/// Turns decoded notifications into broadcasts.
///
/// Channels without a table entry are dropped with a warning; nothing is sent.
#[derive(Clone)]
pub struct Dispatcher {
    table: EventTypeTable,
    registry: ConnectionRegistry,
}

impl Dispatcher {
    pub fn new(table: EventTypeTable, registry: ConnectionRegistry) -> Self {
        Self { table, registry }
    }

    /// Pure mapping step: the message a notification becomes, if any.
    pub fn route(&self, event: NotificationEvent) -> Option<BroadcastMessage> {
        let event_type = self.table.lookup(&event.channel)?;
        Some(BroadcastMessage::event(event_type, event.payload))
    }

    /// Routes and broadcasts one event. Returns how many peers it was handed
    /// to, or `None` when the channel is unknown.
    pub async fn dispatch(&self, event: NotificationEvent) -> Option<usize> {
        let channel = event.channel.clone();
        let Some(message) = self.route(event) else {
            tracing::warn!(channel = %channel, "notification on unknown channel; dropping");
            metrics::record_dropped("unrouted");
            return None;
        };

        let delivered = self.registry.broadcast(&message).await;
        tracing::debug!(
            channel = %channel,
            event_type = message.event_type(),
            delivered,
            "dispatched notification"
        );
        Some(delivered)
    }
}

#[async_trait]
impl NotificationHandler for Dispatcher {
    async fn on_notification(&self, notification: RawNotification) {
        match NotificationEvent::decode(notification) {
            Ok(event) => {
                self.dispatch(event).await;
            }
            Err(e) => {
                tracing::warn!(channel = %e.channel, error = %e.source, "dropping malformed notification");
                metrics::record_dropped("decode");
            }
        }
    }
}
