use anyhow::{Context, Result};
use sqlx::{migrate::Migrator, postgres::PgPool};

/// Chat schema. Versions are timestamps distinct from the auth service's, and
/// versions applied by that service are ignored, so both can migrate one
/// database.
pub fn migrator() -> Migrator {
    let mut migrator = sqlx::migrate!("./src/db/migrations");
    migrator.set_ignore_missing(true);
    migrator
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    migrator().run(pool).await.context("failed to apply chat postgres migrations")
}
