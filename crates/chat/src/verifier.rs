// Out-of-band token verification against the auth service.
//
// Every `auth` frame performs one fresh `POST /api/auth/verify`. There is no
// retry and no caching, and each call is bounded by the configured timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const VERIFY_PATH: &str = "api/auth/verify";

/// A verified user, as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("auth service rejected the token (status {status})")]
    Rejected { status: u16 },
    #[error("auth service unavailable: {0}")]
    Unavailable(String),
    #[error("token verification timed out after {0:?}")]
    Timeout(Duration),
}

impl VerifyError {
    /// True when the auth service answered and said no, as opposed to the
    /// call failing to produce an answer.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

#[derive(Clone)]
pub enum TokenVerifier {
    Remote(RemoteTokenVerifier),
    #[cfg_attr(not(test), allow(dead_code))]
    Static(Arc<HashMap<String, Identity>>),
}

impl TokenVerifier {
    pub async fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        match self {
            Self::Remote(remote) => remote.verify(token).await,
            Self::Static(tokens) => {
                tokens.get(token).cloned().ok_or(VerifyError::Rejected { status: 401 })
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(tokens: impl IntoIterator<Item = (&'static str, Identity)>) -> Self {
        Self::Static(Arc::new(
            tokens.into_iter().map(|(token, identity)| (token.to_owned(), identity)).collect(),
        ))
    }
}

#[derive(Clone)]
pub struct RemoteTokenVerifier {
    client: reqwest::Client,
    verify_url: Url,
    timeout: Duration,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    user_id: UserIdField,
    username: String,
}

/// The auth service sends `user_id` as a string; numbers are accepted too.
#[derive(Deserialize)]
#[serde(untagged)]
enum UserIdField {
    Number(i64),
    Text(String),
}

impl RemoteTokenVerifier {
    pub fn new(auth_service_url: &Url, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build auth service HTTP client")?;
        Ok(Self { client, verify_url: verify_url(auth_service_url)?, timeout })
    }

    pub fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    pub async fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        match tokio::time::timeout(self.timeout, self.request(token)).await {
            Ok(result) => result,
            Err(_) => Err(VerifyError::Timeout(self.timeout)),
        }
    }

    async fn request(&self, token: &str) -> Result<Identity, VerifyError> {
        let response = self
            .client
            .post(self.verify_url.clone())
            .json(&VerifyRequest { token })
            .send()
            .await
            .map_err(|error| VerifyError::Unavailable(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::Rejected { status: status.as_u16() });
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|error| VerifyError::Unavailable(format!("malformed verify response: {error}")))?;

        let user_id = match body.user_id {
            UserIdField::Number(id) => id,
            UserIdField::Text(raw) => raw.trim().parse::<i64>().map_err(|_| {
                VerifyError::Unavailable(format!("verify response has non-numeric user_id `{raw}`"))
            })?,
        };

        Ok(Identity { user_id, username: body.username })
    }
}

/// Joins the verify path onto the service base URL, keeping any path prefix.
fn verify_url(base: &Url) -> anyhow::Result<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(VERIFY_PATH).context("failed to build auth service verify URL")
}
