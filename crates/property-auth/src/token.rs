//! Token endpoint calls and session payloads
//!
//! `refresh_access_token` is the only network call in this crate. Sign-in and
//! OTP verification go through the regular API client; this module only
//! defines the shapes of their responses so the client can seed the store.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::TOKEN_REFRESH_PATH;
use crate::credentials::CredentialPair;
use crate::error::{Error, Result};

/// Body of a successful `POST /auth/token/refresh/`.
///
/// `refresh` is only present when the backend rotates refresh tokens.
#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

/// Token pair as returned by sign-in and OTP verification.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionTokens {
    pub access: String,
    pub refresh: String,
}

impl From<SessionTokens> for CredentialPair {
    fn from(tokens: SessionTokens) -> Self {
        CredentialPair::new(tokens.access, tokens.refresh)
    }
}

/// Response of `/auth/login/` and `/auth/otp/verify/`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
    #[serde(default)]
    pub tokens: Option<SessionTokens>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

/// Exchange a refresh token for a new access token.
///
/// Any non-2xx status is a rejection; the caller treats it as the end of the
/// session. `timeout` bounds the whole exchange.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    base_url: &str,
    refresh: &str,
    timeout: Duration,
) -> Result<RefreshResponse> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), TOKEN_REFRESH_PATH);
    debug!(%url, "requesting access token refresh");

    let response = client
        .post(&url)
        .json(&RefreshRequest { refresh })
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                Error::Timeout
            } else {
                Error::Http(format!("token refresh request failed: {e}"))
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    response.json::<RefreshResponse>().await.map_err(|e| {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::InvalidResponse(format!("invalid refresh response: {e}"))
        }
    })
}
