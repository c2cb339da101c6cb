use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use forum_common::error::{ApiError, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::jwt::JwtAccessTokenService;
use crate::password::{hash_password, verify_password};
use crate::users::{NewUser, User, UserStore, UserStoreError};
use crate::validation::{validate_email, validate_password, validate_username, ValidatedJson};

#[derive(Clone)]
pub struct AuthApiState {
    pub users: UserStore,
    pub jwt: Arc<JwtAccessTokenService>,
}

pub fn router(state: AuthApiState) -> Router {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/verify", post(verify))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    token: String,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    access_token: String,
    user: User,
}

/// The user id is a string so that it survives JavaScript number precision
/// in browser clients.
#[derive(Debug, Serialize)]
struct VerifyResponse {
    user_id: String,
    username: String,
}

async fn register(
    State(state): State<AuthApiState>,
    ValidatedJson(payload): ValidatedJson<RegisterRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let username = payload.username.trim().to_owned();
    let email = payload.email.trim().to_lowercase();
    validate_username(&username)?;
    validate_email(&email)?;
    validate_password(&payload.password)?;

    let password_hash = hash_password(&payload.password).map_err(ApiError::internal)?;
    let user = state
        .users
        .create(NewUser { username, email, password_hash })
        .await
        .map_err(map_store_error)?;

    let access_token =
        state.jwt.issue_access_token(user.id, &user.username).map_err(ApiError::internal)?;
    info!(user_id = user.id, username = %user.username, "user registered");

    Ok((StatusCode::CREATED, Json(SessionResponse { access_token, user })))
}

async fn login(
    State(state): State<AuthApiState>,
    ValidatedJson(payload): ValidatedJson<LoginRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let record = state
        .users
        .find_by_username(payload.username.trim())
        .await
        .map_err(map_store_error)?
        .filter(|record| verify_password(&payload.password, &record.password_hash))
        .ok_or_else(|| ApiError::new(ErrorCode::AuthInvalidCredentials, "Invalid credentials"))?;

    let user = record.user;
    let access_token =
        state.jwt.issue_access_token(user.id, &user.username).map_err(ApiError::internal)?;

    Ok(Json(SessionResponse { access_token, user }))
}

async fn verify(
    State(state): State<AuthApiState>,
    ValidatedJson(payload): ValidatedJson<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let subject = state.jwt.validate_access_token(&payload.token).map_err(|error| {
        info!(error = %error, "token verification rejected");
        ApiError::from_code(ErrorCode::AuthInvalidToken)
    })?;

    // A still-valid token for a deleted account is rejected.
    let user = state
        .users
        .find_by_id(subject.user_id)
        .await
        .map_err(map_store_error)?
        .ok_or_else(|| {
            warn!(user_id = subject.user_id, "token subject no longer exists");
            ApiError::from_code(ErrorCode::AuthInvalidToken)
        })?;

    Ok(Json(VerifyResponse { user_id: user.id.to_string(), username: user.username }))
}

fn map_store_error(error: UserStoreError) -> ApiError {
    match error {
        UserStoreError::Conflict(field) => {
            ApiError::new(ErrorCode::Conflict, format!("{field} is already taken"))
                .with_details(json!({ "field": field }))
        }
        UserStoreError::Database(error) => ApiError::internal(error.into()),
    }
}
