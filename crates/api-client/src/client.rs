//! Authenticated API client
//!
//! Per-call state machine:
//!
//! ```text
//! Sending -> Success | Failed | Unauthorized
//! Unauthorized -> Refreshing -> RetrySending -> Success | Failed
//!                            -> SessionTerminated
//! ```
//!
//! Only a 401 on a request that carried a bearer token leads to
//! `Unauthorized`. Every other failure, including a 401 on a request sent
//! without a token, goes straight back to the caller.

use std::sync::Arc;
use std::time::Duration;

use property_auth::{CredentialStore, is_credential_exempt};
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::executor::RequestExecutor;
use crate::metrics;
use crate::refresh::RefreshCoordinator;
use crate::request::{Body, RequestDescriptor, RequestOptions};
use crate::session::SessionEvent;

/// How many times one call is replayed after a 401. A second 401 after a
/// successful refresh is final.
pub const MAX_AUTH_RETRIES: u32 = 1;

/// Generous enough for a backend waking from a cold start.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Shorter than the request timeout: every queued caller waits on it.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub refresh_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }
}

pub struct ApiClient {
    executor: RequestExecutor,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<RefreshCoordinator>,
    events: broadcast::Sender<SessionEvent>,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Self {
        Self::with_http_client(config, store, reqwest::Client::new())
    }

    /// Build a client around an existing `reqwest::Client` (shared
    /// connection pool, custom TLS roots).
    pub fn with_http_client(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        http: reqwest::Client,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        let refresher = Arc::new(RefreshCoordinator::new(
            store.clone(),
            http.clone(),
            config.base_url.clone(),
            config.refresh_timeout,
            events.clone(),
        ));
        Self {
            executor: RequestExecutor::new(http, config.base_url),
            store,
            refresher,
            events,
            timeout: config.timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn refresher(&self) -> &Arc<RefreshCoordinator> {
        &self.refresher
    }

    pub fn base_url(&self) -> &str {
        self.executor.base_url()
    }

    /// Receive `SessionEvent::Terminated` when a refresh round fails.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Send a request and decode the response body into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T> {
        self.request_body(path, options).await?.decode()
    }

    /// Send a request and return the undecoded body.
    pub async fn request_body(&self, path: &str, options: RequestOptions) -> Result<Body> {
        let mut descriptor = self.describe(path, options);

        let mut sent_token = if descriptor.requires_auth {
            self.store.get().map(|pair| pair.access_token().to_owned())
        } else {
            None
        };
        if let Some(token) = &sent_token {
            descriptor.set_bearer(token);
        }

        let mut retries = 0;
        loop {
            match self.executor.execute(&descriptor).await {
                Err(err @ Error::Http { status: 401, .. }) => {
                    // No credential was sent, so nothing expired: the backend's
                    // answer (a rejected password, say) goes back as-is.
                    let Some(stale) = sent_token.as_deref() else {
                        return Err(err);
                    };
                    if retries >= MAX_AUTH_RETRIES {
                        warn!(
                            request_id = %descriptor.request_id,
                            path,
                            "still unauthorized after credential refresh"
                        );
                        return Err(Error::AuthExpired);
                    }
                    retries += 1;

                    let fresh = self.fresh_access_token(stale).await?;
                    metrics::record_auth_retry();
                    debug!(request_id = %descriptor.request_id, path, "replaying with refreshed credential");
                    descriptor.set_bearer(&fresh);
                    sent_token = Some(fresh);
                }
                other => return other,
            }
        }
    }

    /// Access token to replay with after `stale` was rejected.
    async fn fresh_access_token(&self, stale: &str) -> Result<String> {
        match self.store.get() {
            // Another request's refresh already landed while ours was in flight.
            Some(current) if current.access_token() != stale => {
                debug!("credential already refreshed, reusing it");
                Ok(current.access_token().to_owned())
            }
            Some(_) => {
                let refreshed = self.refresher.refresh_once().await?;
                Ok(refreshed.access_token.expose().clone())
            }
            // A failed round cleared the store; that round already signalled.
            None => {
                info!("session already terminated, not starting another refresh");
                Err(Error::RefreshFailed(
                    property_auth::Error::MissingRefreshToken,
                ))
            }
        }
    }

    fn describe(&self, path: &str, options: RequestOptions) -> RequestDescriptor {
        let mut descriptor = RequestDescriptor::new(
            options.method,
            path,
            options.timeout.unwrap_or(self.timeout),
        );
        descriptor.requires_auth = !is_credential_exempt(path);
        descriptor.set_header("content-type", "application/json");
        for (name, value) in options.headers {
            descriptor.set_header(&name, value);
        }
        descriptor.body = options.body;
        descriptor
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(path, RequestOptions::new(Method::GET)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.request(path, RequestOptions::new(Method::POST).json(body)?)
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.request(path, RequestOptions::new(Method::PUT).json(body)?)
            .await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.request(path, RequestOptions::new(Method::PATCH).json(body)?)
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(path, RequestOptions::new(Method::DELETE)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockBackend, MockOptions};
    use property_auth::{CredentialPair, MemoryCredentialStore};

    fn client_with(backend: &MockBackend, pair: Option<CredentialPair>) -> (ApiClient, Arc<MemoryCredentialStore>) {
        let store = Arc::new(match pair {
            Some(pair) => MemoryCredentialStore::with_credentials(pair),
            None => MemoryCredentialStore::new(),
        });
        let client = ApiClient::new(ClientConfig::new(&backend.base_url), store.clone());
        (client, store)
    }

    fn expired() -> Option<CredentialPair> {
        Some(CredentialPair::new("at_expired", "rt_valid"))
    }

    #[tokio::test]
    async fn valid_credential_passes_through_without_refresh() {
        let backend = MockBackend::start().await;
        let (client, _) = client_with(&backend, Some(CredentialPair::new("at_fresh", "rt_valid")));

        let body: serde_json::Value = client.get("/protected/").await.unwrap();
        assert_eq!(body["token"], "at_fresh");
        assert_eq!(backend.refresh_calls(), 0);
        assert_eq!(backend.protected_calls(), 1);
    }

    #[tokio::test]
    async fn expired_credential_refreshes_once_and_retries() {
        let backend = MockBackend::start().await;
        let (client, store) = client_with(&backend, expired());

        let body: serde_json::Value = client.get("/protected/").await.unwrap();
        assert_eq!(body["token"], "at_fresh");
        assert_eq!(backend.refresh_calls(), 1);
        assert_eq!(backend.protected_calls(), 2);
        assert_eq!(store.get().unwrap().access_token(), "at_fresh");
    }

    #[tokio::test]
    async fn five_concurrent_expired_requests_share_one_refresh() {
        let backend = MockBackend::start_with(MockOptions {
            refresh_delay: Duration::from_millis(200),
            ..MockOptions::default()
        })
        .await;
        let (client, _) = client_with(&backend, expired());

        let results = futures_util::future::join_all(
            (0..5).map(|_| client.get::<serde_json::Value>("/protected/")),
        )
        .await;

        assert_eq!(backend.refresh_calls(), 1);
        for result in results {
            assert_eq!(result.unwrap()["token"], "at_fresh");
        }
        // Five rejected first attempts plus five replays
        assert_eq!(backend.protected_calls(), 10);
    }

    #[tokio::test]
    async fn rejected_refresh_fails_every_caller_and_empties_store() {
        let backend = MockBackend::start_with(MockOptions {
            refresh_status: 400,
            refresh_delay: Duration::from_millis(200),
            ..MockOptions::default()
        })
        .await;
        let (client, store) = client_with(&backend, expired());
        let mut events = client.subscribe();

        let results = futures_util::future::join_all(
            (0..5).map(|_| client.get::<serde_json::Value>("/protected/")),
        )
        .await;

        assert_eq!(backend.refresh_calls(), 1);
        for result in results {
            let err = result.unwrap_err();
            assert!(err.is_session_terminated(), "got {err:?}");
        }
        assert!(store.get().is_none());
        assert!(matches!(events.try_recv(), Ok(SessionEvent::Terminated { .. })));
        assert!(events.try_recv().is_err(), "one redirect, not five");
    }

    #[tokio::test]
    async fn second_unauthorized_after_refresh_is_final() {
        let backend = MockBackend::start().await;
        let (client, _) = client_with(&backend, expired());

        let err = client
            .get::<serde_json::Value>("/always-401/")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthExpired), "got {err:?}");
        assert_eq!(backend.refresh_calls(), 1);
        assert_eq!(backend.always_401_calls(), 2);
    }

    #[tokio::test]
    async fn unauthorized_without_credentials_is_not_refreshed() {
        let backend = MockBackend::start().await;
        let (client, _) = client_with(&backend, None);

        let err = client
            .get::<serde_json::Value>("/protected/")
            .await
            .unwrap_err();
        match &err {
            Error::Http { status: 401, body } => {
                assert_eq!(
                    body.clone().into_value()["detail"],
                    "Given token not valid for any token type"
                );
            }
            other => panic!("expected Http 401, got {other:?}"),
        }
        assert_eq!(backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn other_failures_are_returned_unchanged() {
        let backend = MockBackend::start().await;
        let (client, _) = client_with(&backend, Some(CredentialPair::new("at_fresh", "rt_valid")));

        let err = client
            .get::<serde_json::Value>("/server-error/")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn request_timeout_does_not_cancel_sibling() {
        let backend = MockBackend::start().await;
        let (client, _) = client_with(&backend, None);

        let (short, long) = tokio::join!(
            client.request::<String>(
                "/slow/?ms=200",
                RequestOptions::new(Method::GET).timeout(Duration::from_millis(50)),
            ),
            client.request::<String>(
                "/slow/?ms=200",
                RequestOptions::new(Method::GET).timeout(Duration::from_millis(500)),
            ),
        );
        assert!(matches!(short, Err(Error::Timeout)), "got {short:?}");
        assert_eq!(long.unwrap(), "slow done");
    }

    #[tokio::test]
    async fn exempt_endpoints_carry_no_bearer() {
        let backend = MockBackend::start().await;
        let (client, _) = client_with(&backend, Some(CredentialPair::new("at_fresh", "rt_valid")));

        let echoed: serde_json::Value = client.post("/auth/signup/", &serde_json::json!({})).await.unwrap();
        assert!(echoed["headers"].get("authorization").is_none());

        let echoed: serde_json::Value = client
            .post("/echo/", &serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(echoed["headers"]["authorization"], "Bearer at_fresh");
        assert_eq!(echoed["headers"]["content-type"], "application/json");
        assert_eq!(echoed["body"], r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn caller_headers_override_defaults() {
        let backend = MockBackend::start().await;
        let (client, _) = client_with(&backend, None);

        let echoed: serde_json::Value = client
            .request(
                "/echo/",
                RequestOptions::new(Method::PUT)
                    .header("Content-Type", "text/plain")
                    .body("raw"),
            )
            .await
            .unwrap();
        assert_eq!(echoed["method"], "PUT");
        assert_eq!(echoed["headers"]["content-type"], "text/plain");
        assert_eq!(echoed["body"], "raw");
    }

    #[tokio::test]
    async fn verbs_set_method() {
        let backend = MockBackend::start().await;
        let (client, _) = client_with(&backend, None);

        let patched: serde_json::Value = client.patch("/echo/", &serde_json::json!({})).await.unwrap();
        assert_eq!(patched["method"], "PATCH");
        let deleted: serde_json::Value = client.delete("/echo/").await.unwrap();
        assert_eq!(deleted["method"], "DELETE");
    }

    #[tokio::test]
    async fn straggler_after_refresh_reuses_new_token() {
        let backend = MockBackend::start().await;
        let (client, store) = client_with(&backend, expired());

        // First request refreshes.
        client.get::<serde_json::Value>("/protected/").await.unwrap();
        // Simulate a request that was sent with the old token before the
        // refresh landed: it hits 401 but must not start a second round.
        let fresh = client.fresh_access_token("at_expired").await.unwrap();
        assert_eq!(fresh, "at_fresh");
        assert_eq!(backend.refresh_calls(), 1);
        assert_eq!(store.get().unwrap().access_token(), "at_fresh");
    }

    #[tokio::test]
    async fn straggler_after_failed_refresh_does_not_signal_again() {
        let backend = MockBackend::start_with(MockOptions {
            refresh_status: 401,
            ..MockOptions::default()
        })
        .await;
        let (client, _) = client_with(&backend, expired());
        let mut events = client.subscribe();

        client.get::<serde_json::Value>("/protected/").await.unwrap_err();
        let err = client.fresh_access_token("at_expired").await.unwrap_err();
        assert!(err.is_session_terminated());
        assert_eq!(backend.refresh_calls(), 1);
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
    }
}
