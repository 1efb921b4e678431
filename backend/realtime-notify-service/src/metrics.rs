use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

use crate::services::subscription::LinkState;

static NOTIFICATIONS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "realtime_notify_notifications_received_total",
            "Upstream notifications received, by channel",
        ),
        &["channel"],
    )
    .expect("failed to create realtime_notify_notifications_received_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_notify_notifications_received_total");
    counter
});

static NOTIFICATIONS_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "realtime_notify_notifications_dropped_total",
            "Upstream notifications dropped before fan-out, by reason",
        ),
        &["reason"],
    )
    .expect("failed to create realtime_notify_notifications_dropped_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_notify_notifications_dropped_total");
    counter
});

static DELIVERIES: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "realtime_notify_deliveries_total",
        "Messages enqueued to downstream peers",
    )
    .expect("failed to create realtime_notify_deliveries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_notify_deliveries_total");
    counter
});

static PEER_EVICTIONS: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "realtime_notify_peer_evictions_total",
        "Peers evicted during broadcast because they were closed or too slow",
    )
    .expect("failed to create realtime_notify_peer_evictions_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_notify_peer_evictions_total");
    counter
});

static CONNECTED_PEERS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "realtime_notify_connected_peers",
        "Peers currently admitted to the connection registry",
    )
    .expect("failed to create realtime_notify_connected_peers");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register realtime_notify_connected_peers");
    gauge
});

static UPSTREAM_RECONNECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "realtime_notify_upstream_reconnects_total",
            "Reconnects scheduled for the upstream link, by failure reason",
        ),
        &["reason"],
    )
    .expect("failed to create realtime_notify_upstream_reconnects_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_notify_upstream_reconnects_total");
    counter
});

static UPSTREAM_SUBSCRIBED: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "realtime_notify_upstream_subscribed",
        "1 while the upstream link is subscribed, 0 otherwise",
    )
    .expect("failed to create realtime_notify_upstream_subscribed");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register realtime_notify_upstream_subscribed");
    gauge
});

pub fn record_notification(channel: &str) {
    NOTIFICATIONS_RECEIVED.with_label_values(&[channel]).inc();
}

pub fn record_dropped(reason: &str) {
    NOTIFICATIONS_DROPPED.with_label_values(&[reason]).inc();
}

pub fn record_deliveries(count: usize) {
    DELIVERIES.inc_by(count as u64);
}

pub fn record_evictions(count: usize) {
    PEER_EVICTIONS.inc_by(count as u64);
}

pub fn set_connected_peers(count: usize) {
    CONNECTED_PEERS.set(count as i64);
}

pub fn record_reconnect(reason: &str) {
    UPSTREAM_RECONNECTS.with_label_values(&[reason]).inc();
}

pub fn set_link_state(state: LinkState) {
    UPSTREAM_SUBSCRIBED.set(i64::from(state == LinkState::Subscribed));
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
