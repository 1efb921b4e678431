//! PostgreSQL LISTEN/NOTIFY link
//!
//! tokio-postgres only surfaces notifications through `Connection::poll_message`,
//! so every link owns a forwarder task that drives the connection and turns
//! its async messages into `LinkEvent`s.
use crate::error::{AppError, LinkError};
use crate::models::RawNotification;
use crate::services::subscription::{LinkEvent, NotificationSource, UpstreamLink};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, Client, NoTls};

const UNLISTEN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct PgNotificationSource {
    config: tokio_postgres::Config,
}

impl PgNotificationSource {
    pub fn new(database_url: &str) -> Result<Self, AppError> {
        let config = database_url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| AppError::Config(format!("invalid DATABASE_URL: {e}")))?;
        Ok(Self { config })
    }
}

#[async_trait]
impl NotificationSource for PgNotificationSource {
    async fn connect(&self) -> Result<Box<dyn UpstreamLink>, LinkError> {
        let (client, mut connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| LinkError::Connect(e.to_string()))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            let mut messages = stream::poll_fn(move |cx| connection.poll_message(cx));
            while let Some(message) = messages.next().await {
                match message {
                    Ok(AsyncMessage::Notification(n)) => {
                        let raw = RawNotification::new(n.channel(), n.payload());
                        if events_tx.send(LinkEvent::Notification(raw)).is_err() {
                            return;
                        }
                    }
                    Ok(AsyncMessage::Notice(notice)) => {
                        tracing::debug!(notice = %notice.message(), "postgres notice");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events_tx.send(LinkEvent::Failed(LinkError::Transport(e.to_string())));
                        return;
                    }
                }
            }
            let _ = events_tx.send(LinkEvent::Failed(LinkError::Terminated));
        });

        tracing::debug!("postgres connection established");
        Ok(Box::new(PgLink {
            client,
            events: events_rx,
            forwarder,
        }))
    }
}

struct PgLink {
    client: Client,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    forwarder: JoinHandle<()>,
}

#[async_trait]
impl UpstreamLink for PgLink {
    async fn listen(&mut self, channel: &str) -> Result<(), LinkError> {
        self.client
            .batch_execute(&format!("LISTEN {}", quote_ident(channel)))
            .await
            .map_err(|e| LinkError::Subscribe {
                channel: channel.to_string(),
                reason: e.to_string(),
            })
    }

    async fn next_event(&mut self) -> LinkEvent {
        self.events
            .recv()
            .await
            .unwrap_or(LinkEvent::Failed(LinkError::Terminated))
    }

    async fn ping(&mut self) -> Result<(), LinkError> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| LinkError::Keepalive(e.to_string()))
    }

    async fn close(&mut self) {
        if !self.forwarder.is_finished() {
            match tokio::time::timeout(UNLISTEN_TIMEOUT, self.client.batch_execute("UNLISTEN *")).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "UNLISTEN failed during close"),
                Err(_) => tracing::debug!("UNLISTEN timed out during close"),
            }
        }
        self.forwarder.abort();
    }
}

impl Drop for PgLink {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Quotes a channel name as a SQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
