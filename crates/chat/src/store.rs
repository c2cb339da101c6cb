use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::message::{ChatMessage, NewChatMessage};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chat message store query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("chat message store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence for chat messages with an expiry timestamp.
///
/// `recent` never returns a message whose `expires_at` has passed, whether or
/// not the sweeper has removed it yet.
#[derive(Clone)]
pub enum ChatMessageStore {
    Postgres(sqlx::PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<MemoryMessages>>),
}

#[derive(Debug, Default)]
pub struct MemoryMessages {
    next_id: i64,
    rows: Vec<ChatMessage>,
    save_calls: usize,
    fail_saves: bool,
    fail_reads: bool,
}

impl ChatMessageStore {
    pub async fn save(&self, message: NewChatMessage) -> Result<ChatMessage, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let id = sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO chat_messages
                        (content, author_id, author_username, created_at, expires_at)
                    VALUES ($1, $2, $3, $4, $5)
                    RETURNING id
                    "#,
                )
                .bind(&message.content)
                .bind(message.author_id)
                .bind(&message.author_username)
                .bind(message.created_at)
                .bind(message.expires_at)
                .fetch_one(pool)
                .await?;

                Ok(message.into_stored(id))
            }
            Self::Memory(state) => {
                let mut state = state.write().await;
                state.save_calls += 1;
                if state.fail_saves {
                    return Err(StoreError::Unavailable("injected save failure".into()));
                }
                state.next_id += 1;
                let stored = message.into_stored(state.next_id);
                state.rows.push(stored.clone());
                Ok(stored)
            }
        }
    }

    /// Up to `limit` live messages, newest first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<ChatMessage>, StoreError> {
        self.recent_at(limit, Utc::now()).await
    }

    pub(crate) async fn recent_at(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, ChatMessage>(
                    r#"
                    SELECT id, content, author_id, author_username, created_at, expires_at
                    FROM chat_messages
                    WHERE expires_at > $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
                    "#,
                )
                .bind(now)
                .bind(limit.max(0))
                .fetch_all(pool)
                .await?;

                Ok(rows)
            }
            Self::Memory(state) => {
                let state = state.read().await;
                if state.fail_reads {
                    return Err(StoreError::Unavailable("injected read failure".into()));
                }
                let mut live: Vec<ChatMessage> =
                    state.rows.iter().filter(|row| row.is_live_at(now)).cloned().collect();
                live.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
                live.truncate(usize::try_from(limit).unwrap_or(0));
                Ok(live)
            }
        }
    }

    /// Removes every message with `expires_at <= now`; returns how many.
    pub async fn delete_expired(&self) -> Result<u64, StoreError> {
        self.delete_expired_at(Utc::now()).await
    }

    pub(crate) async fn delete_expired_at(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM chat_messages WHERE expires_at <= $1")
                    .bind(now)
                    .execute(pool)
                    .await?;
                Ok(result.rows_affected())
            }
            Self::Memory(state) => {
                let mut state = state.write().await;
                let before = state.rows.len();
                state.rows.retain(|row| row.is_live_at(now));
                Ok((before - state.rows.len()) as u64)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryMessages::default())))
    }

    #[cfg(test)]
    pub(crate) async fn set_failures(&self, fail_saves: bool, fail_reads: bool) {
        if let Self::Memory(state) = self {
            let mut state = state.write().await;
            state.fail_saves = fail_saves;
            state.fail_reads = fail_reads;
        }
    }

    /// Number of `save` calls the memory backend has seen, failed or not.
    #[cfg(test)]
    pub(crate) async fn save_calls(&self) -> usize {
        match self {
            Self::Memory(state) => state.read().await.save_calls,
            Self::Postgres(_) => 0,
        }
    }

    /// Inserts a row as-is, bypassing `save`'s bookkeeping.
    #[cfg(test)]
    pub(crate) async fn seed(&self, message: NewChatMessage) -> ChatMessage {
        match self {
            Self::Memory(state) => {
                let mut state = state.write().await;
                state.next_id += 1;
                let stored = message.into_stored(state.next_id);
                state.rows.push(stored.clone());
                stored
            }
            Self::Postgres(_) => panic!("seed is only supported on the memory store"),
        }
    }
}

/// Periodically removes expired messages until the runtime shuts down.
pub fn spawn_expiry_sweeper(store: ChatMessageStore, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.delete_expired().await {
                Ok(0) => {}
                Ok(deleted) => info!(deleted, "removed expired chat messages"),
                Err(error) => warn!(error = %error, "expired chat message sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};

    use super::ChatMessageStore;
    use crate::message::NewChatMessage;
    use crate::verifier::Identity;

    fn alice() -> Identity {
        Identity { user_id: 1, username: "alice".into() }
    }

    fn at(seconds: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().expect("valid timestamp")
    }

    #[tokio::test]
    async fn save_then_recent_round_trips_every_field_but_id() {
        let store = ChatMessageStore::for_tests();
        let message = NewChatMessage::new(&alice(), "hello", TimeDelta::minutes(15), Utc::now());

        let saved = store.save(message.clone()).await.expect("save should succeed");
        let recent = store.recent(1).await.expect("recent should succeed");

        assert_eq!(recent, vec![saved.clone()]);
        assert_eq!(saved.content, message.content);
        assert_eq!(saved.author_id, message.author_id);
        assert_eq!(saved.author_username, message.author_username);
        assert_eq!(saved.created_at, message.created_at);
        assert_eq!(saved.expires_at, message.expires_at);
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_limited() {
        let store = ChatMessageStore::for_tests();
        let now = at(1_700_000_000);
        for offset in 0..5 {
            store
                .seed(NewChatMessage::new(&alice(), format!("m{offset}"), TimeDelta::hours(1), now + TimeDelta::seconds(offset)))
                .await;
        }

        let recent = store.recent_at(3, now + TimeDelta::seconds(10)).await.expect("recent");
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3", "m2"]);
    }

    #[tokio::test]
    async fn recent_never_returns_expired_and_sweep_removes_only_expired() {
        let store = ChatMessageStore::for_tests();
        let now = at(1_700_000_000);
        // Expired one second ago.
        store.seed(NewChatMessage::new(&alice(), "old", TimeDelta::seconds(10), now - TimeDelta::seconds(11))).await;
        // Expires exactly now.
        store.seed(NewChatMessage::new(&alice(), "edge", TimeDelta::seconds(10), now - TimeDelta::seconds(10))).await;
        store.seed(NewChatMessage::new(&alice(), "live", TimeDelta::minutes(15), now)).await;

        let recent = store.recent_at(50, now).await.expect("recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "live");

        assert_eq!(store.delete_expired_at(now).await.expect("sweep"), 2);
        assert_eq!(store.delete_expired_at(now).await.expect("second sweep"), 0);
        assert_eq!(store.recent_at(50, now).await.expect("recent").len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let store = ChatMessageStore::for_tests();
        store.set_failures(true, true).await;

        let message = NewChatMessage::new(&alice(), "x", TimeDelta::minutes(1), Utc::now());
        assert!(store.save(message).await.is_err());
        assert!(store.recent(10).await.is_err());
        assert_eq!(store.save_calls().await, 1);
    }
}
