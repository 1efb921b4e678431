use crate::error::AppError;
use crate::services::dispatcher::EventTypeTable;
use crate::services::subscription::SubscriptionConfig;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CHANNELS: &str = "comments_channel,messages_channel";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Path the WebSocket upgrade is served on; every other path is rejected by routing.
    pub ws_path: String,
    /// Outbound queue capacity per peer. A peer that falls this far behind is evicted.
    pub peer_buffer: usize,
    pub subscription: SubscriptionConfig,
    pub event_types: EventTypeTable,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so parsing can be tested
    /// without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::Config("DATABASE_URL missing".into()))?;

        let port = parse_or(&lookup, "PORT", 3000u16)?;
        let peer_buffer = parse_or(&lookup, "WS_PEER_BUFFER", 256usize)?;
        if peer_buffer == 0 {
            return Err(AppError::Config("WS_PEER_BUFFER must be at least 1".into()));
        }

        let ws_path = lookup("WS_PATH").unwrap_or_else(|| "/ws".to_string());
        if !ws_path.starts_with('/') {
            return Err(AppError::Config(format!(
                "WS_PATH must start with '/': {ws_path}"
            )));
        }

        let channels = parse_list(&lookup("NOTIFY_CHANNELS").unwrap_or_else(|| DEFAULT_CHANNELS.into()));
        if channels.is_empty() {
            return Err(AppError::Config("NOTIFY_CHANNELS is empty".into()));
        }

        let mut event_types = EventTypeTable::default();
        if let Some(raw) = lookup("NOTIFY_EVENT_TYPES") {
            for (channel, event_type) in parse_pairs(&raw)? {
                event_types.insert(channel, event_type);
            }
        }

        let keepalive_interval = secs_or(&lookup, "KEEPALIVE_INTERVAL_SECS", 30)?;
        if keepalive_interval.is_zero() {
            return Err(AppError::Config(
                "KEEPALIVE_INTERVAL_SECS must be greater than 0".into(),
            ));
        }

        let keepalive_timeout = secs_or(&lookup, "KEEPALIVE_TIMEOUT_SECS", 10)?;
        if keepalive_timeout.is_zero() {
            return Err(AppError::Config(
                "KEEPALIVE_TIMEOUT_SECS must be greater than 0".into(),
            ));
        }

        let subscription = SubscriptionConfig {
            channels,
            keepalive_interval,
            keepalive_timeout,
            reconnect_delay: secs_or(&lookup, "RECONNECT_DELAY_SECS", 5)?,
            connect_timeout: secs_or(&lookup, "CONNECT_TIMEOUT_SECS", 10)?,
        };

        Ok(Self {
            port,
            database_url,
            ws_path,
            peer_buffer,
            subscription,
            event_types,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key}: {e}"))),
        None => Ok(default),
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: u64) -> Result<Duration, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default).map(Duration::from_secs)
}

fn parse_list(value: &str) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !items.iter().any(|existing| existing == item) {
            items.push(item.to_string());
        }
    }
    items
}

/// Parses `channel=EVENT_TYPE` pairs separated by commas.
fn parse_pairs(value: &str) -> Result<Vec<(String, String)>, AppError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((channel, event_type))
                if !channel.trim().is_empty() && !event_type.trim().is_empty() =>
            {
                Ok((channel.trim().to_string(), event_type.trim().to_string()))
            }
            _ => Err(AppError::Config(format!(
                "NOTIFY_EVENT_TYPES entry must look like channel=TYPE: {pair}"
            ))),
        })
        .collect()
}
