use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use forum_common::error::{current_request_id, with_request_id_scope};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{decode_frame, send_frame, send_frames};
use super::registry::OUTBOUND_QUEUE_CAPACITY;
use super::session::ChatSession;
use super::ChatRouterState;

const MAX_FRAME_BYTES: usize = 64 * 1024;

pub async fn ws_upgrade(
    State(state): State<ChatRouterState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let request_id = current_request_id().unwrap_or_else(|| Uuid::new_v4().to_string());

    ws.max_frame_size(MAX_FRAME_BYTES).max_message_size(MAX_FRAME_BYTES).on_upgrade(
        move |socket| async move {
            with_request_id_scope(request_id.clone(), handle_socket(socket, state, request_id)).await
        },
    )
}

async fn handle_socket(mut socket: WebSocket, state: ChatRouterState, request_id: String) {
    let session_id = Uuid::new_v4();
    let (outbound_sender, mut outbound_receiver) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let mut session = ChatSession::new(session_id, outbound_sender, state.clone());
    info!(session_id = %session_id, request_id = %request_id, "chat connection opened");

    if send_frames(&mut socket, session.connect_backlog().await).await.is_err() {
        session.close().await;
        return;
    }

    let idle_timeout = state.settings.idle_timeout;
    let mut heartbeat_interval = tokio::time::interval(state.settings.heartbeat_interval);
    heartbeat_interval.reset(); // skip immediate first tick
    let idle_deadline = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle_deadline);

    let reason = loop {
        tokio::select! {
            _ = &mut idle_deadline => break "idle timeout",
            _ = heartbeat_interval.tick() => {
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break "ping write failed";
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(frame) => {
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break "broadcast write failed";
                        }
                    }
                    // The registry dropped our sender: this session was evicted.
                    None => break "evicted",
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break "connection closed";
                };
                let message = match message {
                    Ok(message) => message,
                    Err(error) => {
                        debug!(session_id = %session_id, error = %error, "chat socket read failed");
                        break "read failed";
                    }
                };
                idle_deadline.as_mut().reset(Instant::now() + idle_timeout);

                match message {
                    Message::Text(raw) => {
                        let frame = match decode_frame(&raw) {
                            Ok(frame) => frame,
                            Err(error) => {
                                warn!(session_id = %session_id, error = %error, "ignoring malformed chat frame");
                                continue;
                            }
                        };
                        debug!(session_id = %session_id, frame = frame.kind(), "chat frame received");
                        let replies = session.handle_frame(frame).await;
                        if send_frames(&mut socket, replies).await.is_err() {
                            break "reply write failed";
                        }
                    }
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break "pong write failed";
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break "closed by client",
                    Message::Binary(_) => {
                        debug!(session_id = %session_id, "ignoring binary chat frame");
                    }
                }
            }
        }
    };

    session.close().await;
    let _ = socket.send(Message::Close(None)).await;
    info!(session_id = %session_id, reason, "chat connection closed");
}
