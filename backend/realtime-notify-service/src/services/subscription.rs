//! Durable upstream subscription
//!
//! State transitions (driven by a single task):
//! - Disconnected → Connecting: on start and after each reconnect delay
//! - Connecting → Subscribed: link opened and every channel LISTENed
//! - Connecting → Disconnected: connect/subscribe failure, one reconnect scheduled
//! - Subscribed → Degraded → Disconnected: transport error, termination or
//!   keepalive failure; the old link is closed while Degraded
//! - any → Stopped: after `stop()`
//!
//! The keepalive interval and the reconnect sleep are locals of the driver's
//! subscribed and disconnected phases, so at most one of each exists.
use crate::error::LinkError;
use crate::metrics;
use crate::models::RawNotification;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Subscribed,
    Degraded,
    Stopped,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Subscribed => "subscribed",
            LinkState::Degraded => "degraded",
            LinkState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Channels to LISTEN on, fixed for the lifetime of the manager
    pub channels: Vec<String>,
    /// Period of the `SELECT 1` probe while subscribed
    pub keepalive_interval: Duration,
    /// How long a single probe may take before the link is declared dead
    pub keepalive_timeout: Duration,
    /// Fixed delay before every reconnect attempt (no exponential backoff)
    pub reconnect_delay: Duration,
    /// Upper bound for connect + LISTEN of one attempt
    pub connect_timeout: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            channels: vec![
                "comments_channel".to_string(),
                "messages_channel".to_string(),
            ],
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// What an open link yields next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Notification(RawNotification),
    Failed(LinkError),
}

/// Factory for upstream links.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn UpstreamLink>, LinkError>;
}

/// One open upstream connection. Owned exclusively by the manager's driver.
#[async_trait]
pub trait UpstreamLink: Send {
    async fn listen(&mut self, channel: &str) -> Result<(), LinkError>;

    /// Must be cancel-safe: the driver races it against timers.
    async fn next_event(&mut self) -> LinkEvent;

    /// Trivial round-trip used as the keepalive probe.
    async fn ping(&mut self) -> Result<(), LinkError>;

    async fn close(&mut self);
}

/// Callback invoked once per raw notification, in arrival order.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn on_notification(&self, notification: RawNotification);
}

/// Counters exposed for readiness checks and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub connect_attempts: u64,
    pub subscriptions: u64,
    pub reconnects_scheduled: u64,
    pub keepalive_loops_armed: u64,
    pub keepalive_loops_active: usize,
}

struct Shared {
    config: SubscriptionConfig,
    state_tx: watch::Sender<LinkState>,
    shutdown_tx: watch::Sender<bool>,
    handler: RwLock<Option<Arc<dyn NotificationHandler>>>,
    reconnect_pending: AtomicBool,
    reconnect_requested: AtomicBool,
    reconnect_notify: Notify,
    connect_attempts: AtomicU64,
    subscriptions: AtomicU64,
    reconnects_scheduled: AtomicU64,
    keepalive_armed: AtomicU64,
    keepalive_active: AtomicUsize,
}

pub struct SubscriptionManager {
    shared: Arc<Shared>,
    source: Arc<dyn NotificationSource>,
    started: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionManager {
    pub fn new(config: SubscriptionConfig, source: Arc<dyn NotificationSource>) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                config,
                state_tx,
                shutdown_tx,
                handler: RwLock::new(None),
                reconnect_pending: AtomicBool::new(false),
                reconnect_requested: AtomicBool::new(false),
                reconnect_notify: Notify::new(),
                connect_attempts: AtomicU64::new(0),
                subscriptions: AtomicU64::new(0),
                reconnects_scheduled: AtomicU64::new(0),
                keepalive_armed: AtomicU64::new(0),
                keepalive_active: AtomicUsize::new(0),
            }),
            source,
            started: AtomicBool::new(false),
            driver: Mutex::new(None),
        }
    }

    /// Register the handler for incoming notifications, replacing any previous one.
    pub fn on_notification(&self, handler: Arc<dyn NotificationHandler>) {
        *self.shared.handler.write() = Some(handler);
    }

    /// Spawn the driver task. Calling it again, or after `stop()`, does nothing.
    pub fn start(&self) {
        if *self.shared.shutdown_tx.borrow() {
            tracing::warn!("subscription manager already stopped; ignoring start");
            return;
        }
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::warn!("subscription manager already started");
            return;
        }

        let shared = self.shared.clone();
        let source = self.source.clone();
        let handle = tokio::spawn(async move { shared.drive(source).await });
        *self.driver.lock() = Some(handle);
    }

    /// Tear everything down: cancels the keepalive and any pending reconnect
    /// timer, closes the link if open and waits for the driver to finish.
    ///
    /// Safe to call before `start()` and more than once.
    pub async fn stop(&self) {
        let already = self.shared.shutdown_tx.send_replace(true);
        if !already {
            tracing::info!("stopping upstream subscription");
        }

        let driver = self.driver.lock().take();
        if let Some(handle) = driver {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "subscription driver ended abnormally");
            }
        }
        self.shared.set_state(LinkState::Stopped);
    }

    /// Force a reconnect cycle of a healthy link.
    ///
    /// Returns `false` (and does nothing) when the link is not subscribed or a
    /// reconnect is already pending or requested.
    pub fn request_reconnect(&self) -> bool {
        if self.state() != LinkState::Subscribed
            || self.shared.reconnect_pending.load(Ordering::Acquire)
        {
            return false;
        }
        if self.shared.reconnect_requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shared.reconnect_notify.notify_one();
        true
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.shared.state_tx.subscribe()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.shared.reconnect_pending.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SubscriptionStats {
        let shared = &self.shared;
        SubscriptionStats {
            connect_attempts: shared.connect_attempts.load(Ordering::Acquire),
            subscriptions: shared.subscriptions.load(Ordering::Acquire),
            reconnects_scheduled: shared.reconnects_scheduled.load(Ordering::Acquire),
            keepalive_loops_armed: shared.keepalive_armed.load(Ordering::Acquire),
            keepalive_loops_active: shared.keepalive_active.load(Ordering::Acquire),
        }
    }
}

impl Shared {
    async fn drive(&self, source: Arc<dyn NotificationSource>) {
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(LinkState::Connecting);
            self.reconnect_pending.store(false, Ordering::Release);
            let attempt = self.open_link(source.as_ref()).await;

            // an attempt that finished after stop() is discarded
            if *shutdown.borrow() {
                if let Ok(mut link) = attempt {
                    tracing::info!("discarding upstream link opened during shutdown");
                    link.close().await;
                }
                break;
            }

            let failure = match attempt {
                Ok(mut link) => {
                    self.subscriptions.fetch_add(1, Ordering::AcqRel);
                    // cleared before Subscribed is visible; only requests for this link count
                    self.reconnect_requested.store(false, Ordering::Release);
                    self.set_state(LinkState::Subscribed);
                    tracing::info!(channels = ?self.config.channels, "upstream link subscribed");

                    let exit = self.pump(link.as_mut(), &mut shutdown).await;
                    if exit.is_some() {
                        self.set_state(LinkState::Degraded);
                    }
                    link.close().await;

                    match exit {
                        Some(err) => err,
                        None => break,
                    }
                }
                Err(err) => err,
            };

            self.set_state(LinkState::Disconnected);
            if self.schedule_reconnect(&failure) {
                tracing::warn!(
                    error = %failure,
                    delay = ?self.config.reconnect_delay,
                    "upstream link lost; reconnect scheduled"
                );
            }

            tokio::select! {
                _ = time::sleep(self.config.reconnect_delay) => {}
                _ = stopping(&mut shutdown) => break,
            }
        }

        self.set_state(LinkState::Stopped);
        tracing::info!("upstream subscription stopped");
    }

    async fn open_link(
        &self,
        source: &dyn NotificationSource,
    ) -> Result<Box<dyn UpstreamLink>, LinkError> {
        self.connect_attempts.fetch_add(1, Ordering::AcqRel);

        let connect = async {
            let mut link = source.connect().await?;
            for channel in &self.config.channels {
                if let Err(e) = link.listen(channel).await {
                    link.close().await;
                    return Err(e);
                }
            }
            Ok::<_, LinkError>(link)
        };

        match time::timeout(self.config.connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::ConnectTimeout(self.config.connect_timeout)),
        }
    }

    /// Runs while subscribed. Returns the failure that ended the link, or
    /// `None` on shutdown.
    async fn pump(
        &self,
        link: &mut dyn UpstreamLink,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<LinkError> {
        let _armed = KeepaliveGuard::arm(self);
        let period = self.config.keepalive_interval;
        let mut keepalive = time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = link.next_event() => match event {
                    LinkEvent::Notification(notification) => self.deliver(notification).await,
                    LinkEvent::Failed(err) => return Some(err),
                },
                _ = keepalive.tick() => {
                    if let Err(err) = self.probe(link).await {
                        return Some(err);
                    }
                }
                _ = self.reconnect_notify.notified() => {
                    // permits left over from an earlier link are ignored
                    if self.reconnect_requested.swap(false, Ordering::AcqRel) {
                        return Some(LinkError::ReconnectRequested);
                    }
                }
                _ = stopping(shutdown) => return None,
            }
        }
    }

    async fn probe(&self, link: &mut dyn UpstreamLink) -> Result<(), LinkError> {
        let limit = self.config.keepalive_timeout;
        match time::timeout(limit, link.ping()).await {
            Ok(Ok(())) => {
                tracing::trace!("keepalive probe ok");
                Ok(())
            }
            Ok(Err(e)) => Err(LinkError::Keepalive(e.to_string())),
            Err(_) => Err(LinkError::Keepalive(format!("no reply within {limit:?}"))),
        }
    }

    async fn deliver(&self, notification: RawNotification) {
        metrics::record_notification(&notification.channel);
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler.on_notification(notification).await,
            None => tracing::debug!(
                channel = %notification.channel,
                "no notification handler registered; dropping"
            ),
        }
    }

    /// Marks a reconnect as pending. Returns `false` if one already was.
    fn schedule_reconnect(&self, cause: &LinkError) -> bool {
        if self
            .reconnect_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.reconnects_scheduled.fetch_add(1, Ordering::AcqRel);
        metrics::record_reconnect(cause.reason());
        true
    }

    fn set_state(&self, next: LinkState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "upstream link state");
            metrics::set_link_state(next);
        }
    }
}

/// Resolves once shutdown has been requested.
async fn stopping(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopping| *stopping).await;
}

/// Counts the live keepalive loop for the duration of one subscribed phase.
struct KeepaliveGuard<'a>(&'a Shared);

impl<'a> KeepaliveGuard<'a> {
    fn arm(shared: &'a Shared) -> Self {
        shared.keepalive_armed.fetch_add(1, Ordering::AcqRel);
        let active = shared.keepalive_active.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert_eq!(active, 1, "more than one keepalive loop armed");
        Self(shared)
    }
}

impl Drop for KeepaliveGuard<'_> {
    fn drop(&mut self) {
        self.0.keepalive_active.fetch_sub(1, Ordering::AcqRel);
    }
}
