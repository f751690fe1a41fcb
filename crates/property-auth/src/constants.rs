//! Property237 backend endpoint paths
//!
//! Paths are relative to the API base URL (for example
//! `http://localhost:8000/api`). Every path ends with a trailing slash
//! because the backend routes require it.

/// Development fallback when neither config nor environment set a base URL
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// Environment variable that overrides the configured base URL
pub const API_URL_ENV: &str = "PROPERTY237_API_URL";

/// Exchanges a refresh token for a new access token
pub const TOKEN_REFRESH_PATH: &str = "/auth/token/refresh/";

pub const LOGIN_PATH: &str = "/auth/login/";
pub const SIGNUP_PATH: &str = "/auth/signup/";
pub const LOGOUT_PATH: &str = "/auth/logout/";
pub const OTP_REQUEST_PATH: &str = "/auth/otp/request/";
pub const OTP_VERIFY_PATH: &str = "/auth/otp/verify/";
pub const PASSWORD_RESET_REQUEST_PATH: &str = "/auth/password/reset/request/";
pub const PASSWORD_RESET_CONFIRM_PATH: &str = "/auth/password/reset/confirm/";

/// Endpoints that must never carry an `Authorization` header. A stale
/// bearer token on a login, OTP or password-reset call would be rejected
/// before the credentials in the body are checked.
pub const CREDENTIAL_EXEMPT_PATHS: &[&str] = &[
    LOGIN_PATH,
    SIGNUP_PATH,
    OTP_REQUEST_PATH,
    OTP_VERIFY_PATH,
    PASSWORD_RESET_REQUEST_PATH,
    PASSWORD_RESET_CONFIRM_PATH,
    TOKEN_REFRESH_PATH,
];

/// Whether `path` targets one of the credential-exempt endpoints.
///
/// The query string and a trailing slash are ignored
/// (`/auth/login?next=/dashboard`, `/auth/login`); the rest must match a
/// whole endpoint path, so `/auth/login-history/` is not exempt.
pub fn is_credential_exempt(path: &str) -> bool {
    let path = path.split('?').next().unwrap_or(path).trim_end_matches('/');
    CREDENTIAL_EXEMPT_PATHS
        .iter()
        .any(|exempt| path == exempt.trim_end_matches('/'))
}
