// Request body extraction and credential field rules.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};
use forum_common::error::{ApiError, ErrorCode};
use serde::de::DeserializeOwned;
use serde_json::json;

pub const USERNAME_MIN_CHARS: usize = 3;
pub const USERNAME_MAX_CHARS: usize = 32;
pub const PASSWORD_MIN_CHARS: usize = 6;

/// JSON body extractor that answers with a `VALIDATION_FAILED` envelope
/// instead of axum's plain-text rejection.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => {
                let (message, kind) = match &rejection {
                    JsonRejection::JsonDataError(e) => (format!("invalid JSON payload: {e}"), "data_error"),
                    JsonRejection::JsonSyntaxError(e) => (format!("malformed JSON: {e}"), "syntax_error"),
                    JsonRejection::MissingJsonContentType(_) => {
                        ("expected Content-Type: application/json".to_string(), "missing_content_type")
                    }
                    other => (format!("request body error: {other}"), "body_error"),
                };
                Err(ApiError::new(ErrorCode::ValidationFailed, message)
                    .with_details(json!({ "kind": kind }))
                    .into_response())
            }
        }
    }
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let chars = username.chars().count();
    if !(USERNAME_MIN_CHARS..=USERNAME_MAX_CHARS).contains(&chars) {
        return Err(field_error(
            "username",
            format!("username must be {USERNAME_MIN_CHARS} to {USERNAME_MAX_CHARS} characters"),
        ));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(field_error("username", "username must not contain whitespace"));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(field_error("email", "email must be a valid address")),
    }
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < PASSWORD_MIN_CHARS {
        return Err(field_error(
            "password",
            format!("password must be at least {PASSWORD_MIN_CHARS} characters"),
        ));
    }
    Ok(())
}

fn field_error(field: &str, message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::ValidationFailed, message).with_details(json!({ "field": field }))
}
