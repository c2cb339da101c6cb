// WebSocket frame types for the forum chat protocol.
//
// Frames are JSON text messages tagged by a `type` field. Client and server
// frames are separate enums because the `message` frame has a different shape
// in each direction.

use serde::{Deserialize, Serialize};

/// Error text sent when a token fails verification.
pub const INVALID_TOKEN: &str = "Invalid token";
/// Error text sent when a `message` frame arrives before a successful `auth`.
pub const AUTH_REQUIRED: &str = "You must authenticate first";
/// Error text sent when a `message` frame has no visible content.
pub const EMPTY_MESSAGE: &str = "Message content must not be empty";

/// Frames accepted from chat clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Application-level keepalive.
    Ping,

    /// Bind an identity to the connection. A missing token decodes as empty
    /// and is answered like any other invalid token.
    Auth {
        #[serde(default)]
        token: String,
        #[serde(
            default,
            rename = "lastMessageTimestamp",
            skip_serializing_if = "Option::is_none"
        )]
        last_message_timestamp: Option<i64>,
    },

    /// Post a chat message. Missing content decodes as empty.
    Message {
        #[serde(default)]
        content: String,
        #[serde(
            default,
            rename = "lastMessageTimestamp",
            skip_serializing_if = "Option::is_none"
        )]
        last_message_timestamp: Option<i64>,
    },
}

impl ClientFrame {
    /// The client's watermark (unix seconds of the newest message it has
    /// rendered), when the frame carries a positive one.
    pub fn watermark(&self) -> Option<i64> {
        match self {
            Self::Ping => None,
            Self::Auth { last_message_timestamp, .. }
            | Self::Message { last_message_timestamp, .. } => {
                last_message_timestamp.filter(|timestamp| *timestamp > 0)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Auth { .. } => "auth",
            Self::Message { .. } => "message",
        }
    }
}

/// Frames sent by the chat server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Pong,

    AuthSuccess { data: AuthSuccessData },

    /// A chat message, either live fan-out or backlog replay.
    Message {
        content: String,
        author: String,
        /// `"{author_id}:{created_at unix nanos}"`.
        id: String,
        /// `created_at` in unix seconds.
        timestamp: i64,
    },

    /// Acknowledgement to the sender of a `message` frame.
    MessageSent { id: String, timestamp: i64 },

    Error { content: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSuccessData {
    pub username: String,
}

impl ServerFrame {
    pub fn error(content: impl Into<String>) -> Self {
        Self::Error { content: content.into() }
    }

    pub fn auth_success(username: impl Into<String>) -> Self {
        Self::AuthSuccess { data: AuthSuccessData { username: username.into() } }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientFrame, ServerFrame, AUTH_REQUIRED};
    use serde_json::json;

    #[test]
    fn decodes_ping_without_payload() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).expect("ping decodes");
        assert_eq!(frame, ClientFrame::Ping);
        assert_eq!(frame.watermark(), None);
    }

    #[test]
    fn decodes_auth_with_camel_case_watermark() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"auth","token":"abc","lastMessageTimestamp":1700000000}"#)
                .expect("auth decodes");
        assert_eq!(
            frame,
            ClientFrame::Auth { token: "abc".into(), last_message_timestamp: Some(1_700_000_000) }
        );
        assert_eq!(frame.watermark(), Some(1_700_000_000));
    }

    #[test]
    fn zero_watermark_is_ignored() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"message","content":"hi","lastMessageTimestamp":0}"#)
                .expect("message decodes");
        assert_eq!(frame.watermark(), None);
    }

    #[test]
    fn unknown_type_is_a_decode_error() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"subscribe"}"#).is_err());
        assert!(serde_json::from_str::<ClientFrame>(r#"{"token":"abc"}"#).is_err());
    }

    #[test]
    fn missing_token_and_content_decode_as_empty() {
        assert_eq!(
            serde_json::from_str::<ClientFrame>(r#"{"type":"auth"}"#).expect("auth decodes"),
            ClientFrame::Auth { token: String::new(), last_message_timestamp: None }
        );
        assert_eq!(
            serde_json::from_str::<ClientFrame>(r#"{"type":"message"}"#).expect("message decodes"),
            ClientFrame::Message { content: String::new(), last_message_timestamp: None }
        );
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"auth","token":null}"#).is_err());
    }

    #[test]
    fn server_frames_serialize_to_wire_shapes() {
        assert_eq!(serde_json::to_value(ServerFrame::Pong).expect("pong"), json!({"type": "pong"}));
        assert_eq!(
            serde_json::to_value(ServerFrame::auth_success("alice")).expect("auth_success"),
            json!({"type": "auth_success", "data": {"username": "alice"}})
        );
        assert_eq!(
            serde_json::to_value(ServerFrame::error(AUTH_REQUIRED)).expect("error"),
            json!({"type": "error", "content": "You must authenticate first"})
        );
        assert_eq!(
            serde_json::to_value(ServerFrame::MessageSent { id: "7:1".into(), timestamp: 1 })
                .expect("message_sent"),
            json!({"type": "message_sent", "id": "7:1", "timestamp": 1})
        );
    }
}
