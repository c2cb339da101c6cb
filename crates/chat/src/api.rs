// REST surface over the chat store: `GET /api/v1/chat/messages`.

use axum::{
    extract::{Extension, Query, Request, State},
    http::header::AUTHORIZATION,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use forum_common::error::{ApiError, ErrorCode};
use serde::Deserialize;
use tracing::warn;

use crate::message::ChatMessage;
use crate::store::ChatMessageStore;
use crate::verifier::{Identity, TokenVerifier};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Clone)]
pub struct ChatApiState {
    pub store: ChatMessageStore,
    pub verifier: TokenVerifier,
}

pub fn router(state: ChatApiState) -> Router {
    Router::new()
        .route("/api/v1/chat/messages", get(list_messages))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_auth))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ListMessagesQuery {
    limit: Option<i64>,
}

async fn list_messages(
    State(state): State<ChatApiState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let messages = state.store.recent(limit).await.map_err(|error| {
        warn!(user_id = identity.user_id, "chat message listing failed");
        ApiError::internal(error.into())
    })?;
    Ok(Json(messages))
}

/// Verifies the bearer token with the auth service and stores the resulting
/// [`Identity`] as a request extension.
async fn require_bearer_auth(
    State(state): State<ChatApiState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
        .map(ToOwned::to_owned)
    else {
        return ApiError::new(ErrorCode::AuthInvalidToken, "missing bearer token").into_response();
    };

    let identity = match state.verifier.verify(&token).await {
        Ok(identity) => identity,
        Err(error) if error.is_rejection() => {
            return ApiError::new(ErrorCode::AuthInvalidToken, "invalid bearer token").into_response();
        }
        Err(error) => {
            warn!(error = %error, "bearer token could not be verified");
            return ApiError::from_code(ErrorCode::AuthUnavailable).into_response();
        }
    };

    request.extensions_mut().insert(identity);
    next.run(request).await
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{header::AUTHORIZATION, Request, StatusCode},
    };
    use chrono::{TimeDelta, Utc};
    use serde_json::Value;
    use tokio::net::TcpListener;
    use tower::ServiceExt;
    use url::Url;

    use super::{extract_bearer_token, router, ChatApiState};
    use crate::message::NewChatMessage;
    use crate::store::ChatMessageStore;
    use crate::verifier::{Identity, RemoteTokenVerifier, TokenVerifier};

    fn alice() -> Identity {
        Identity { user_id: 1, username: "alice".into() }
    }

    fn test_state() -> ChatApiState {
        ChatApiState {
            store: ChatMessageStore::for_tests(),
            verifier: TokenVerifier::for_tests([("alice-token", alice())]),
        }
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).expect("request should build")
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body should read");
        serde_json::from_slice(&bytes).expect("body should be json")
    }

    #[tokio::test]
    async fn rejects_missing_and_invalid_tokens() {
        let app = router(test_state());

        let response = app.clone().oneshot(get("/api/v1/chat/messages", None)).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response =
            app.oneshot(get("/api/v1/chat/messages", Some("forged"))).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"]["code"], "AUTH_INVALID_TOKEN");
    }

    #[tokio::test]
    async fn lists_live_messages_newest_first_with_clamped_limit() {
        let state = test_state();
        let now = Utc::now();
        for (offset, content) in ["first", "second", "third"].into_iter().enumerate() {
            let created = now - TimeDelta::seconds(10 - offset as i64);
            state
                .store
                .seed(NewChatMessage::new(&alice(), content, TimeDelta::minutes(15), created))
                .await;
        }
        state
            .store
            .seed(NewChatMessage::new(&alice(), "expired", TimeDelta::seconds(1), now - TimeDelta::minutes(5)))
            .await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(get("/api/v1/chat/messages", Some("alice-token")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let contents: Vec<&str> = body
            .as_array()
            .expect("array body")
            .iter()
            .map(|message| message["content"].as_str().expect("content"))
            .collect();
        assert_eq!(contents, vec!["third", "second", "first"]);
        assert_eq!(body[0]["author_username"], "alice");
        assert_eq!(body[0]["author_id"], 1);

        let response = app
            .oneshot(get("/api/v1/chat/messages?limit=0", Some("alice-token")))
            .await
            .expect("response");
        assert_eq!(body_json(response).await.as_array().expect("array body").len(), 1);
    }

    #[tokio::test]
    async fn store_failure_is_an_internal_error() {
        let state = test_state();
        state.store.set_failures(false, true).await;

        let response =
            router(state).oneshot(get("/api/v1/chat/messages", Some("alice-token"))).await.expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"]["code"], "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn unreachable_auth_service_is_service_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);
        let base = Url::parse(&format!("http://{addr}")).expect("url");
        let state = ChatApiState {
            store: ChatMessageStore::for_tests(),
            verifier: TokenVerifier::Remote(
                RemoteTokenVerifier::new(&base, Duration::from_secs(1)).expect("verifier"),
            ),
        };

        let response =
            router(state).oneshot(get("/api/v1/chat/messages", Some("any"))).await.expect("response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"]["retryable"], true);
    }

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("bearer   abc  "), Some("abc"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Bearer"), None);
    }
}
