use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

/// Public view of a user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// A user row including the stored password hash.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    #[sqlx(flatten)]
    pub user: User,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("{0} is already taken")]
    Conflict(&'static str),
    #[error("user store query failed: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Clone)]
pub enum UserStore {
    Postgres(sqlx::PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<HashMap<i64, UserRecord>>>),
}

impl UserStore {
    pub async fn create(&self, new_user: NewUser) -> Result<User, UserStoreError> {
        match self {
            Self::Postgres(pool) => {
                let created = sqlx::query_as::<_, User>(
                    r#"
                    INSERT INTO users (username, email, password_hash)
                    VALUES ($1, $2, $3)
                    RETURNING id, username, email, created_at
                    "#,
                )
                .bind(&new_user.username)
                .bind(&new_user.email)
                .bind(&new_user.password_hash)
                .fetch_one(pool)
                .await
                .map_err(map_unique_violation)?;

                Ok(created)
            }
            Self::Memory(users) => {
                let mut users = users.write().await;
                if users.values().any(|record| record.user.username == new_user.username) {
                    return Err(UserStoreError::Conflict("username"));
                }
                if users.values().any(|record| record.user.email == new_user.email) {
                    return Err(UserStoreError::Conflict("email"));
                }

                let id = users.keys().max().copied().unwrap_or(0) + 1;
                let user = User {
                    id,
                    username: new_user.username,
                    email: new_user.email,
                    created_at: Utc::now().trunc_subsecs(6),
                };
                users.insert(id, UserRecord { user: user.clone(), password_hash: new_user.password_hash });
                Ok(user)
            }
        }
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, UserStoreError> {
        match self {
            Self::Postgres(pool) => Ok(sqlx::query_as::<_, UserRecord>(
                r#"
                SELECT id, username, email, created_at, password_hash
                FROM users
                WHERE username = $1
                "#,
            )
            .bind(username)
            .fetch_optional(pool)
            .await?),
            Self::Memory(users) => Ok(users
                .read()
                .await
                .values()
                .find(|record| record.user.username == username)
                .cloned()),
        }
    }

    pub async fn find_by_id(&self, user_id: i64) -> Result<Option<User>, UserStoreError> {
        match self {
            Self::Postgres(pool) => Ok(sqlx::query_as::<_, User>(
                "SELECT id, username, email, created_at FROM users WHERE id = $1",
            )
            .bind(user_id)
            .fetch_optional(pool)
            .await?),
            Self::Memory(users) => {
                Ok(users.read().await.get(&user_id).map(|record| record.user.clone()))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }
}

fn map_unique_violation(error: sqlx::Error) -> UserStoreError {
    if let sqlx::Error::Database(database_error) = &error {
        if database_error.code().as_deref() == Some("23505") {
            let field = match database_error.constraint() {
                Some(constraint) if constraint.contains("email") => "email",
                _ => "username",
            };
            return UserStoreError::Conflict(field);
        }
    }

    UserStoreError::Database(error)
}
