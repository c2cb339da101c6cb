use axum::extract::ws::{Message, WebSocket};
use forum_common::protocol::chat::{ClientFrame, ServerFrame};

pub fn decode_frame(raw: &str) -> Result<ClientFrame, serde_json::Error> {
    serde_json::from_str::<ClientFrame>(raw)
}

pub fn encode_frame(frame: &ServerFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

pub async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), ()> {
    let encoded = encode_frame(frame).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

/// Sends frames in order, stopping at the first write failure.
pub async fn send_frames(socket: &mut WebSocket, frames: Vec<ServerFrame>) -> Result<(), ()> {
    for frame in &frames {
        send_frame(socket, frame).await?;
    }
    Ok(())
}
