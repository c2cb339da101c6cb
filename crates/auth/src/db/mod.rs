use anyhow::{Context, Result};
use sqlx::{migrate::Migrator, postgres::PgPool};

/// Users schema. The auth and chat services can share one database, so each
/// migrator skips versions recorded by the other.
pub fn migrator() -> Migrator {
    let mut migrator = sqlx::migrate!("./src/db/migrations");
    migrator.set_ignore_missing(true);
    migrator
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    migrator().run(pool).await.context("failed to apply auth postgres migrations")
}
