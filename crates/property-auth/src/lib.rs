//! Property237 session credentials
//!
//! Holds the access/refresh credential pair and last-known user identity,
//! and wraps the token endpoint of the Property237 backend. This crate has
//! no knowledge of request retries or refresh coordination; it only stores
//! credentials and talks to `/auth/token/refresh/`.
//!
//! Credential flow:
//! 1. Sign-in or OTP verification returns a `SessionTokens` pair
//! 2. The pair is written with `CredentialStore::set()`
//! 3. On a 401, the client calls `token::refresh_access_token()` once
//! 4. The new access token replaces the old pair via `CredentialStore::set()`
//! 5. Sign-out or a rejected refresh calls `CredentialStore::clear()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use constants::*;
pub use credentials::{
    CredentialPair, CredentialStore, FileCredentialStore, MemoryCredentialStore,
};
pub use error::{Error, Result};
pub use token::{RefreshResponse, SessionResponse, SessionTokens, refresh_access_token};
