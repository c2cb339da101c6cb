use forum_common::protocol::chat::{ClientFrame, ServerFrame, AUTH_REQUIRED, INVALID_TOKEN};

fn load_contract() -> serde_json::Value {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../contracts/chat-protocol.json");
    let content = std::fs::read_to_string(path).expect("contract file should be readable");
    serde_json::from_str(&content).expect("contract file should be valid JSON")
}

fn frames<'a>(contract: &'a serde_json::Value, key: &str) -> &'a Vec<serde_json::Value> {
    contract[key].as_array().unwrap_or_else(|| panic!("{key} should be an array"))
}

#[test]
fn client_frames_decode_and_reencode_unchanged() {
    let contract = load_contract();
    for expected in frames(&contract, "client_frames") {
        let frame: ClientFrame = serde_json::from_value(expected.clone())
            .unwrap_or_else(|error| panic!("client frame {expected} should decode: {error}"));
        let encoded = serde_json::to_value(&frame).expect("client frame should encode");
        assert_eq!(&encoded, expected);
    }
}

#[test]
fn server_frames_decode_and_reencode_unchanged() {
    let contract = load_contract();
    for expected in frames(&contract, "server_frames") {
        let frame: ServerFrame = serde_json::from_value(expected.clone())
            .unwrap_or_else(|error| panic!("server frame {expected} should decode: {error}"));
        let encoded = serde_json::to_value(&frame).expect("server frame should encode");
        assert_eq!(&encoded, expected);
    }
}

#[test]
fn malformed_client_frames_are_rejected() {
    let contract = load_contract();
    for rejected in frames(&contract, "rejected_client_frames") {
        assert!(
            serde_json::from_value::<ClientFrame>(rejected.clone()).is_err(),
            "frame {rejected} should not decode"
        );
    }
}

#[test]
fn missing_token_or_content_decodes_as_empty() {
    let contract = load_contract();
    for frame in frames(&contract, "client_frames_missing_fields") {
        match serde_json::from_value::<ClientFrame>(frame.clone())
            .unwrap_or_else(|error| panic!("frame {frame} should decode: {error}"))
        {
            ClientFrame::Auth { token, .. } => assert!(token.is_empty()),
            ClientFrame::Message { content, .. } => assert!(content.is_empty()),
            ClientFrame::Ping => panic!("frame {frame} decoded as ping"),
        }
    }
}

#[test]
fn error_texts_match_contract() {
    let contract = load_contract();
    let error_contents: Vec<&str> = frames(&contract, "server_frames")
        .iter()
        .filter(|frame| frame["type"] == "error")
        .map(|frame| frame["content"].as_str().expect("error content should be a string"))
        .collect();
    assert_eq!(error_contents, vec![INVALID_TOKEN, AUTH_REQUIRED]);
}

#[test]
fn message_ids_have_author_and_nanosecond_parts() {
    let contract = load_contract();
    for frame in frames(&contract, "server_frames") {
        let Some(id) = frame["id"].as_str() else { continue };
        let (author, nanos) = id.split_once(':').expect("id should be author:nanos");
        assert!(author.parse::<i64>().is_ok(), "author part of {id} should be numeric");
        let nanos = nanos.parse::<i64>().expect("nanos part should be numeric");
        let seconds = frame["timestamp"].as_i64().expect("timestamp should be an integer");
        assert_eq!(nanos / 1_000_000_000, seconds);
    }
}
