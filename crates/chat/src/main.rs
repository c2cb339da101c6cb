mod api;
mod config;
mod db;
mod message;
mod store;
mod verifier;
mod ws;

use std::time::Duration;

use anyhow::Context;
use axum::{routing::get, Router};
use chrono::TimeDelta;
use forum_common::db::{check_pool_health, create_pg_pool, PoolConfig};
use forum_common::http::{apply_middleware, healthz, shutdown_signal};
use forum_common::telemetry::init_tracing;
use tokio::net::TcpListener;
use tracing::info;

use crate::api::ChatApiState;
use crate::config::ChatConfig;
use crate::store::{spawn_expiry_sweeper, ChatMessageStore};
use crate::verifier::{RemoteTokenVerifier, TokenVerifier};
use crate::ws::{ChatRouterState, ConnectionRegistry, SessionSettings};

/// Upper bound on the server ping period; shorter idle timeouts ping faster.
const MAX_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ChatConfig::from_env().context("invalid chat service configuration")?;
    init_tracing(&config.log_filter);

    let pool = create_pg_pool(&config.database_url, PoolConfig::from_env())
        .await
        .context("failed to initialize chat PostgreSQL pool")?;
    check_pool_health(&pool).await?;
    db::run_migrations(&pool).await?;
    let store = ChatMessageStore::Postgres(pool);

    let verifier = TokenVerifier::Remote(
        RemoteTokenVerifier::new(&config.auth_service_url, config.verify_timeout)
            .context("failed to build token verifier")?,
    );
    if let TokenVerifier::Remote(remote) = &verifier {
        info!(verify_url = %remote.verify_url(), timeout = ?config.verify_timeout, "token verifier ready");
    }

    let settings = session_settings(&config)?;
    let sweeper = spawn_expiry_sweeper(store.clone(), config.sweep_interval);

    let app = build_router(
        ChatRouterState {
            store: store.clone(),
            verifier: verifier.clone(),
            registry: ConnectionRegistry::default(),
            settings,
        },
        ChatApiState { store, verifier },
        config.cors_origins.as_deref(),
    );

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind chat listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting chat server");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("chat server exited unexpectedly");
    sweeper.abort();
    served
}

fn session_settings(config: &ChatConfig) -> anyhow::Result<SessionSettings> {
    let message_ttl = TimeDelta::from_std(config.message_ttl)
        .context("FORUM_CHAT_MESSAGE_TTL_SECS is out of range")?;

    Ok(SessionSettings {
        message_ttl,
        backlog_limit: config.backlog_limit,
        heartbeat_interval: (config.idle_timeout / 2).min(MAX_HEARTBEAT_INTERVAL),
        idle_timeout: config.idle_timeout,
    })
}

fn build_router(ws_state: ChatRouterState, api_state: ChatApiState, cors_origins: Option<&str>) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(ws::router(ws_state))
            .merge(api::router(api_state)),
        cors_origins,
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::TimeDelta;
    use tower::ServiceExt;

    use super::{build_router, session_settings};
    use crate::api::ChatApiState;
    use crate::config::ChatConfig;
    use crate::store::ChatMessageStore;
    use crate::verifier::{Identity, TokenVerifier};
    use crate::ws::{ChatRouterState, ConnectionRegistry, SessionSettings};

    fn test_router() -> axum::Router {
        let store = ChatMessageStore::for_tests();
        let verifier =
            TokenVerifier::for_tests([("token", Identity { user_id: 1, username: "alice".into() })]);
        build_router(
            ChatRouterState {
                store: store.clone(),
                verifier: verifier.clone(),
                registry: ConnectionRegistry::default(),
                settings: SessionSettings::default(),
            },
            ChatApiState { store, verifier },
            None,
        )
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let response = test_router()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn websocket_route_requires_upgrade() {
        let response = test_router()
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert!(response.status().is_client_error());
    }

    #[test]
    fn session_settings_follow_config() {
        let env = HashMap::from([
            ("FORUM_CHAT_IDLE_TIMEOUT_SECS", "10"),
            ("FORUM_CHAT_MESSAGE_TTL_SECS", "120"),
            ("FORUM_CHAT_BACKLOG_LIMIT", "5"),
        ]);
        let config = ChatConfig::from_env_fn(|key| {
            env.get(key).map(|value| value.to_string()).ok_or(std::env::VarError::NotPresent)
        })
        .expect("config parses");

        let settings = session_settings(&config).expect("settings build");
        assert_eq!(settings.message_ttl, TimeDelta::minutes(2));
        assert_eq!(settings.backlog_limit, 5);
        assert_eq!(settings.idle_timeout, Duration::from_secs(10));
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(5));

        let defaults = session_settings(
            &ChatConfig::from_env_fn(|_| Err(std::env::VarError::NotPresent)).expect("defaults"),
        )
        .expect("settings build");
        assert_eq!(defaults.heartbeat_interval, Duration::from_secs(25));
    }
}
