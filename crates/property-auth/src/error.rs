//! Error types for credential storage and token endpoint calls

/// Errors from credential and token operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("token endpoint unreachable: {0}")]
    Http(String),

    #[error("token endpoint timed out")]
    Timeout,

    #[error("refresh token rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("no refresh token available")]
    MissingRefreshToken,

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
