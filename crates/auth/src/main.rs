mod api;
mod config;
mod db;
mod jwt;
mod password;
mod users;
mod validation;

use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use forum_common::db::{check_pool_health, create_pg_pool, PoolConfig};
use forum_common::http::{apply_middleware, healthz, shutdown_signal};
use forum_common::telemetry::init_tracing;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::AuthApiState;
use crate::config::AuthConfig;
use crate::jwt::JwtAccessTokenService;
use crate::users::UserStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AuthConfig::from_env();
    init_tracing(&config.log_filter);

    if config.is_dev_jwt_secret() {
        warn!("FORUM_AUTH_JWT_SECRET is unset; using the development secret");
    }
    let jwt = JwtAccessTokenService::new(&config.jwt_secret)
        .context("FORUM_AUTH_JWT_SECRET is not usable")?;

    let pool = create_pg_pool(&config.database_url, PoolConfig::from_env())
        .await
        .context("failed to initialize auth PostgreSQL pool")?;
    check_pool_health(&pool).await?;
    db::run_migrations(&pool).await?;

    let app = build_router(
        AuthApiState { users: UserStore::Postgres(pool), jwt: Arc::new(jwt) },
        config.cors_origins.as_deref(),
    );

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind auth listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting auth server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("auth server exited unexpectedly")
}

fn build_router(state: AuthApiState, cors_origins: Option<&str>) -> Router {
    apply_middleware(
        Router::new().route("/healthz", get(healthz)).merge(api::router(state)),
        cors_origins,
    )
}
