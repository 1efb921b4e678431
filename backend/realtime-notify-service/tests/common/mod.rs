//! Shared fixtures: an in-memory upstream and an in-memory downstream peer.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use realtime_notify_service::error::{LinkError, PeerError};
use realtime_notify_service::models::RawNotification;
use realtime_notify_service::services::{
    LinkEvent, NotificationHandler, NotificationSource, SubscriptionConfig, UpstreamLink,
};
use realtime_notify_service::websocket::{Inbound, PeerConnection};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub fn test_config() -> SubscriptionConfig {
    SubscriptionConfig {
        channels: vec!["comments_channel".into(), "messages_channel".into()],
        keepalive_interval: Duration::from_secs(30),
        keepalive_timeout: Duration::from_secs(10),
        reconnect_delay: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(10),
    }
}

/// Polls `check` until it holds, sleeping in small steps. Meant for paused-time tests.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) {
    for _ in 0..6_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not met in time");
}

/// Test-side view of one link the mock upstream handed out.
#[derive(Clone)]
pub struct LinkControl {
    events: mpsc::UnboundedSender<LinkEvent>,
    pub listened: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl LinkControl {
    pub fn notify(&self, channel: &str, payload: &str) {
        let _ = self
            .events
            .send(LinkEvent::Notification(RawNotification::new(channel, payload)));
    }

    pub fn fail(&self, err: LinkError) {
        let _ = self.events.send(LinkEvent::Failed(err));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Behaviour knobs shared by the mock source and every link it creates.
pub struct MockUpstream {
    pub connect_failures: AtomicUsize,
    pub connect_delay: Mutex<Option<Duration>>,
    pub ping_ok: AtomicBool,
    pub ping_hangs: AtomicBool,
    pub pings: AtomicUsize,
    links: Mutex<Vec<LinkControl>>,
}

impl MockUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connect_failures: AtomicUsize::new(0),
            connect_delay: Mutex::new(None),
            ping_ok: AtomicBool::new(true),
            ping_hangs: AtomicBool::new(false),
            pings: AtomicUsize::new(0),
            links: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_next_connects(&self, n: usize) {
        self.connect_failures.store(n, Ordering::Release);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = Some(delay);
    }

    pub fn set_ping_ok(&self, ok: bool) {
        self.ping_ok.store(ok, Ordering::Release);
    }

    pub fn set_ping_hangs(&self, hangs: bool) {
        self.ping_hangs.store(hangs, Ordering::Release);
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().len()
    }

    pub fn link(&self, index: usize) -> LinkControl {
        self.links.lock()[index].clone()
    }

    pub fn latest(&self) -> LinkControl {
        self.links
            .lock()
            .last()
            .cloned()
            .expect("no link opened yet")
    }

    pub fn source(self: &Arc<Self>) -> Arc<dyn NotificationSource> {
        Arc::new(MockSource(self.clone()))
    }
}

struct MockSource(Arc<MockUpstream>);

#[async_trait]
impl NotificationSource for MockSource {
    async fn connect(&self) -> Result<Box<dyn UpstreamLink>, LinkError> {
        let delay = *self.0.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .0
            .connect_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LinkError::Connect("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let control = LinkControl {
            events: tx,
            listened: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        self.0.links.lock().push(control.clone());

        Ok(Box::new(MockLink {
            upstream: self.0.clone(),
            events: rx,
            control,
        }))
    }
}

struct MockLink {
    upstream: Arc<MockUpstream>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    control: LinkControl,
}

#[async_trait]
impl UpstreamLink for MockLink {
    async fn listen(&mut self, channel: &str) -> Result<(), LinkError> {
        self.control.listened.lock().push(channel.to_string());
        Ok(())
    }

    async fn next_event(&mut self) -> LinkEvent {
        self.events
            .recv()
            .await
            .unwrap_or(LinkEvent::Failed(LinkError::Terminated))
    }

    async fn ping(&mut self) -> Result<(), LinkError> {
        self.upstream.pings.fetch_add(1, Ordering::AcqRel);
        if self.upstream.ping_hangs.load(Ordering::Acquire) {
            std::future::pending::<()>().await;
        }
        if self.upstream.ping_ok.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(LinkError::Transport("server closed the connection".into()))
        }
    }

    async fn close(&mut self) {
        self.control.closed.store(true, Ordering::Release);
    }
}

/// Handler that records every raw notification it sees.
#[derive(Default)]
pub struct RecordingHandler {
    pub seen: Mutex<Vec<RawNotification>>,
}

impl RecordingHandler {
    pub fn channels(&self) -> Vec<String> {
        self.seen.lock().iter().map(|n| n.channel.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl NotificationHandler for RecordingHandler {
    async fn on_notification(&self, notification: RawNotification) {
        self.seen.lock().push(notification);
    }
}

/// Test-side view of a downstream peer.
#[derive(Clone)]
pub struct PeerControl {
    pub sent: Arc<Mutex<Vec<String>>>,
    pub fail_sends: Arc<AtomicBool>,
    pub closed: Arc<AtomicBool>,
    pub pongs: Arc<Mutex<Vec<Vec<u8>>>>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl PeerControl {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn hang_up(&self, reason: Inbound) {
        let _ = self.inbound.send(reason);
    }

    pub fn ping(&self, payload: &[u8]) {
        let _ = self.inbound.send(Inbound::Ping(payload.to_vec()));
    }

    pub fn pongs(&self) -> Vec<Vec<u8>> {
        self.pongs.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

pub struct MockPeer {
    control: PeerControl,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl MockPeer {
    pub fn new() -> (Self, PeerControl) {
        let (tx, rx) = mpsc::unbounded_channel();
        let control = PeerControl {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_sends: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            pongs: Arc::new(Mutex::new(Vec::new())),
            inbound: tx,
        };
        (
            Self {
                control: control.clone(),
                inbound: rx,
            },
            control,
        )
    }
}

#[async_trait(?Send)]
impl PeerConnection for MockPeer {
    async fn send_text(&mut self, text: String) -> Result<(), PeerError> {
        if self.control.fail_sends.load(Ordering::Acquire) {
            return Err(PeerError::Closed);
        }
        self.control.sent.lock().push(text);
        Ok(())
    }

    async fn next_inbound(&mut self) -> Inbound {
        self.inbound.recv().await.unwrap_or(Inbound::Closed)
    }

    async fn pong(&mut self, payload: &[u8]) -> Result<(), PeerError> {
        // a real transport write suspends before the frame is out
        tokio::task::yield_now().await;
        if self.control.fail_sends.load(Ordering::Acquire) {
            return Err(PeerError::Closed);
        }
        self.control.pongs.lock().push(payload.to_vec());
        Ok(())
    }

    async fn close(&mut self) {
        self.control.closed.store(true, Ordering::Release);
    }
}
