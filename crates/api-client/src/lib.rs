//! Authenticated request pipeline for the Property237 API
//!
//! Callers hand `ApiClient` a path and options and get back a typed value or
//! a classified `Error`. Underneath:
//!
//! - `RequestExecutor` performs exactly one HTTP exchange with its own
//!   deadline and classifies the outcome.
//! - `RefreshCoordinator` collapses any number of simultaneous 401s into a
//!   single refresh round and releases the waiters in arrival order.
//! - `ApiClient` attaches the bearer credential, reacts to 401 with one
//!   refresh-and-replay, and exposes the session flows (sign-in, OTP,
//!   sign-out).
//!
//! Credentials live in a `property_auth::CredentialStore` injected at
//! construction, so each client (and each test) owns its own session.

pub mod client;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod refresh;
pub mod request;
pub mod session;

#[cfg(test)]
mod test_support;

pub use client::{
    ApiClient, ClientConfig, DEFAULT_REFRESH_TIMEOUT, DEFAULT_TIMEOUT, MAX_AUTH_RETRIES,
};
pub use error::{Error, Result};
pub use executor::RequestExecutor;
pub use refresh::{RefreshCoordinator, Refreshed};
pub use request::{Body, RequestDescriptor, RequestOptions};
pub use session::{OtpChannel, OtpPurpose, SessionEvent};

pub use reqwest::Method;
