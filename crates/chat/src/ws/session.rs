use chrono::Utc;
use forum_common::protocol::chat::{
    ClientFrame, ServerFrame, AUTH_REQUIRED, EMPTY_MESSAGE, INVALID_TOKEN,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ChatRouterState;
use crate::message::{ChatMessage, NewChatMessage};
use crate::verifier::Identity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(Identity),
}

/// Protocol state for one WebSocket connection.
///
/// Consumes decoded client frames in arrival order and returns the frames to
/// send back to this connection. Fan-out to other connections goes through
/// the registry.
pub struct ChatSession {
    session_id: Uuid,
    state: SessionState,
    /// Unix seconds of the newest message the client says it has rendered.
    watermark: i64,
    /// Held until the first successful auth hands it to the registry.
    outbound: Option<mpsc::Sender<ServerFrame>>,
    deps: ChatRouterState,
}

impl ChatSession {
    pub fn new(session_id: Uuid, outbound: mpsc::Sender<ServerFrame>, deps: ChatRouterState) -> Self {
        Self {
            session_id,
            state: SessionState::Unauthenticated,
            watermark: 0,
            outbound: Some(outbound),
            deps,
        }
    }

    pub fn id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    /// Backlog sent right after the upgrade, before any frame is read.
    pub async fn connect_backlog(&self) -> Vec<ServerFrame> {
        self.backlog().await
    }

    pub async fn handle_frame(&mut self, frame: ClientFrame) -> Vec<ServerFrame> {
        if let Some(watermark) = frame.watermark() {
            self.watermark = watermark;
        }

        match frame {
            ClientFrame::Ping => vec![ServerFrame::Pong],
            ClientFrame::Auth { token, .. } => self.authenticate(&token).await,
            ClientFrame::Message { content, .. } => self.post_message(content).await,
        }
    }

    /// Removes the session from the registry. Safe to call when it was never
    /// registered or has already been evicted.
    pub async fn close(&self) {
        self.deps.registry.unregister(self.session_id).await;
    }

    async fn authenticate(&mut self, token: &str) -> Vec<ServerFrame> {
        if token.trim().is_empty() {
            debug!(session_id = %self.session_id, "auth frame without a token");
            return vec![ServerFrame::error(INVALID_TOKEN)];
        }

        let identity = match self.deps.verifier.verify(token).await {
            Ok(identity) => identity,
            Err(error) if error.is_rejection() => {
                info!(session_id = %self.session_id, error = %error, "chat auth rejected");
                return vec![ServerFrame::error(INVALID_TOKEN)];
            }
            Err(error) => {
                warn!(session_id = %self.session_id, error = %error, "chat auth could not be verified");
                return vec![ServerFrame::error(INVALID_TOKEN)];
            }
        };

        match self.outbound.take() {
            Some(outbound) => {
                self.deps.registry.register(self.session_id, identity.clone(), outbound).await;
            }
            None => {
                if !self.deps.registry.rebind(self.session_id, identity.clone()).await {
                    debug!(session_id = %self.session_id, "re-auth on a session that was already evicted");
                }
            }
        }

        info!(
            session_id = %self.session_id,
            user_id = identity.user_id,
            username = %identity.username,
            "chat session authenticated"
        );

        let mut frames = vec![ServerFrame::auth_success(identity.username.clone())];
        self.state = SessionState::Authenticated(identity);
        frames.extend(self.backlog().await);
        frames
    }

    async fn post_message(&mut self, content: String) -> Vec<ServerFrame> {
        let SessionState::Authenticated(identity) = &self.state else {
            return vec![ServerFrame::error(AUTH_REQUIRED)];
        };
        if content.trim().is_empty() {
            return vec![ServerFrame::error(EMPTY_MESSAGE)];
        }

        let message = NewChatMessage::new(identity, content, self.deps.settings.message_ttl, Utc::now());
        let stored = match self.deps.store.save(message).await {
            Ok(stored) => stored,
            Err(error) => {
                warn!(
                    session_id = %self.session_id,
                    user_id = identity.user_id,
                    error = %error,
                    "failed to save chat message; dropping it"
                );
                return Vec::new();
            }
        };

        let report = self.deps.registry.broadcast_except(self.session_id, &stored.to_frame()).await;
        debug!(
            session_id = %self.session_id,
            message_id = stored.id,
            delivered = report.delivered,
            evicted = report.evicted.len(),
            "chat message broadcast"
        );

        vec![ServerFrame::MessageSent { id: stored.wire_id(), timestamp: stored.timestamp() }]
    }

    async fn backlog(&self) -> Vec<ServerFrame> {
        match self.deps.store.recent(self.deps.settings.backlog_limit).await {
            Ok(recent) => replay_frames(&recent, self.watermark),
            Err(error) => {
                warn!(session_id = %self.session_id, error = %error, "failed to load chat backlog");
                Vec::new()
            }
        }
    }
}

/// Turns a newest-first page of messages into oldest-first `message` frames,
/// skipping everything at or below the client's watermark.
pub fn replay_frames(recent_newest_first: &[ChatMessage], watermark: i64) -> Vec<ServerFrame> {
    recent_newest_first
        .iter()
        .rev()
        .filter(|message| message.timestamp() > watermark)
        .map(ChatMessage::to_frame)
        .collect()
}
