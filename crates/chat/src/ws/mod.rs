mod handler;
pub mod protocol;
pub mod registry;
pub mod session;

use std::time::Duration;

use axum::{routing::get, Router};
use chrono::TimeDelta;

pub use handler::ws_upgrade;
pub use registry::ConnectionRegistry;

use crate::store::ChatMessageStore;
use crate::verifier::TokenVerifier;

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_BACKLOG_LIMIT: i64 = 50;
const DEFAULT_MESSAGE_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub message_ttl: TimeDelta,
    pub backlog_limit: i64,
    /// Period of server-initiated WebSocket pings.
    pub heartbeat_interval: Duration,
    /// The connection closes when nothing is received for this long.
    pub idle_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            message_ttl: TimeDelta::minutes(DEFAULT_MESSAGE_TTL_MINUTES),
            backlog_limit: DEFAULT_BACKLOG_LIMIT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct ChatRouterState {
    pub store: ChatMessageStore,
    pub verifier: TokenVerifier,
    pub registry: ConnectionRegistry,
    pub settings: SessionSettings,
}

pub fn router(state: ChatRouterState) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}
