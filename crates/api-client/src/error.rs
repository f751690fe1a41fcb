//! Classified request failures

use crate::request::Body;

/// Why a request did not produce a usable response.
///
/// `Clone` so one refresh failure can be handed to every caller that was
/// waiting on the same refresh round.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Connection refused, DNS failure, reset mid-response.
    #[error("network failure: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-2xx status. The session is still valid.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: Body },

    /// 401 that could not be resolved by a refresh-and-retry.
    #[error("authentication expired")]
    AuthExpired,

    /// The refresh token was rejected or the refresh call itself failed.
    /// The credential store has been cleared.
    #[error("credential refresh failed: {0}")]
    RefreshFailed(property_auth::Error),

    #[error("credential store error: {0}")]
    Store(property_auth::Error),

    #[error("response did not match the expected shape: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Short label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Network(_) => "network",
            Error::Timeout => "timeout",
            Error::Http { .. } => "http",
            Error::AuthExpired => "auth_expired",
            Error::RefreshFailed(_) => "refresh_failed",
            Error::Store(_) => "store",
            Error::Decode(_) => "decode",
            Error::InvalidRequest(_) => "invalid_request",
        }
    }

    /// HTTP status, when the server produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::AuthExpired => Some(401),
            _ => None,
        }
    }

    /// Whether the caller must sign in again.
    pub fn is_session_terminated(&self) -> bool {
        matches!(self, Error::RefreshFailed(_))
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
