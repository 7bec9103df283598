//! External identity service client (spec §4.2).
//!
//! A thin `reqwest`-backed adapter: given a bearer token, calls `/me` on the
//! configured identity service and returns a [`User`]. No caching — each
//! session re-validates its own token at handshake time.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub avatar_url: String,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("token rejected by identity service")]
    Unauthorized,
    #[error("identity service unreachable: {0}")]
    Unreachable(#[source] anyhow::Error),
    #[error("identity service returned a malformed response: {0}")]
    Malformed(#[source] anyhow::Error),
}

/// Raw shape of the identity service's `/me` response. Field names follow
/// the external service's contract, not ours — `avatar` is optional there.
#[derive(Debug, Deserialize)]
struct MeResponse {
    id: UserId,
    name: String,
    avatar: Option<String>,
}

#[derive(Clone)]
pub struct IdentityClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    default_avatar: String,
}

impl IdentityClient {
    pub fn new(base_url: impl Into<String>, default_avatar: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
            default_avatar: default_avatar.into(),
        }
    }

    pub async fn authenticate(&self, token: &str) -> Result<User, IdentityError> {
        let url = format!("{}/me", self.base_url.trim_end_matches('/'));
        let resp = tokio::time::timeout(
            self.timeout,
            self.http.get(&url).bearer_auth(token).send(),
        )
        .await
        .map_err(|_| IdentityError::Unreachable(anyhow::anyhow!("identity service timed out")))?
        .map_err(|e| IdentityError::Unreachable(e.into()))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED
            || resp.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(IdentityError::Unauthorized);
        }
        if !resp.status().is_success() {
            return Err(IdentityError::Unreachable(anyhow::anyhow!(
                "identity service returned status {}",
                resp.status()
            )));
        }

        let body: MeResponse = resp
            .json()
            .await
            .map_err(|e| IdentityError::Malformed(e.into()))?;

        Ok(User {
            id: body.id,
            name: body.name,
            avatar_url: body.avatar.unwrap_or_else(|| self.default_avatar.clone()),
        })
    }
}
