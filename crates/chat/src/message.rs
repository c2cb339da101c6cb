use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use forum_common::protocol::chat::ServerFrame;
use serde::Serialize;

use crate::verifier::Identity;

/// A chat message that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatMessage {
    pub content: String,
    pub author_id: i64,
    pub author_username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewChatMessage {
    /// Builds a message authored by `identity` at `now`, live for `ttl`.
    ///
    /// Timestamps are truncated to microseconds, the resolution PostgreSQL
    /// stores, so a saved message reads back with identical timestamps.
    /// `ttl` must be positive.
    pub fn new(identity: &Identity, content: impl Into<String>, ttl: TimeDelta, now: DateTime<Utc>) -> Self {
        let created_at = now.trunc_subsecs(6);
        Self {
            content: content.into(),
            author_id: identity.user_id,
            author_username: identity.username.clone(),
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn wire_id(&self) -> String {
        wire_id(self.author_id, self.created_at)
    }

    pub(crate) fn into_stored(self, id: i64) -> ChatMessage {
        ChatMessage {
            id,
            content: self.content,
            author_id: self.author_id,
            author_username: self.author_username,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub content: String,
    pub author_id: i64,
    pub author_username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn wire_id(&self) -> String {
        wire_id(self.author_id, self.created_at)
    }

    /// Unix seconds of `created_at`, the unit clients use for watermarks.
    pub fn timestamp(&self) -> i64 {
        self.created_at.timestamp()
    }

    pub fn to_frame(&self) -> ServerFrame {
        ServerFrame::Message {
            content: self.content.clone(),
            author: self.author_username.clone(),
            id: self.wire_id(),
            timestamp: self.timestamp(),
        }
    }
}

/// `"{author_id}:{created_at unix nanos}"`. Clients deduplicate replayed
/// messages by this id, so live, ack and backlog frames must agree on it.
pub fn wire_id(author_id: i64, created_at: DateTime<Utc>) -> String {
    // Out of range only past the year 2262.
    let nanos = created_at.timestamp_nanos_opt().unwrap_or_else(|| created_at.timestamp_micros() * 1_000);
    format!("{author_id}:{nanos}")
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};
    use forum_common::protocol::chat::ServerFrame;

    use super::NewChatMessage;
    use crate::verifier::Identity;

    fn alice() -> Identity {
        Identity { user_id: 42, username: "alice".into() }
    }

    #[test]
    fn construction_truncates_to_microseconds_and_applies_ttl() {
        let now = Utc.timestamp_opt(1_700_000_000, 123_456_789).single().expect("valid time");
        let message = NewChatMessage::new(&alice(), "hi", TimeDelta::minutes(15), now);

        assert_eq!(message.created_at.timestamp_subsec_nanos(), 123_456_000);
        assert_eq!(message.expires_at - message.created_at, TimeDelta::minutes(15));
        assert!(message.expires_at > message.created_at);
        assert_eq!(message.author_id, 42);
        assert_eq!(message.author_username, "alice");
    }

    #[test]
    fn wire_id_uses_author_and_nanoseconds() {
        let now = Utc.timestamp_opt(1_700_000_000, 123_456_789).single().expect("valid time");
        let message = NewChatMessage::new(&alice(), "hi", TimeDelta::minutes(15), now);
        assert_eq!(message.wire_id(), "42:1700000000123456000");

        let stored = message.clone().into_stored(9);
        assert_eq!(stored.wire_id(), message.wire_id());
    }

    #[test]
    fn stored_message_renders_as_message_frame() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid time");
        let stored = NewChatMessage::new(&alice(), "hello", TimeDelta::minutes(15), now).into_stored(1);

        assert_eq!(
            stored.to_frame(),
            ServerFrame::Message {
                content: "hello".into(),
                author: "alice".into(),
                id: "42:1700000000000000000".into(),
                timestamp: 1_700_000_000,
            }
        );
    }

    #[test]
    fn liveness_is_strict() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid time");
        let stored = NewChatMessage::new(&alice(), "x", TimeDelta::seconds(10), now).into_stored(1);
        assert!(stored.is_live_at(now + TimeDelta::seconds(9)));
        assert!(!stored.is_live_at(now + TimeDelta::seconds(10)));
    }
}
