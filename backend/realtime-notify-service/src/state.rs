use crate::config::Config;
use crate::services::SubscriptionManager;
use crate::websocket::{ConnectionRegistry, Gateway};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: ConnectionRegistry,
    pub gateway: Gateway,
    /// Upstream link; read-only from the HTTP side except for readiness
    pub subscription: Arc<SubscriptionManager>,
}
