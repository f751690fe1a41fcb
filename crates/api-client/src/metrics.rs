//! Client-side metrics
//!
//! Emitted through the `metrics` facade; the embedding application decides
//! whether to install a recorder. Without one every call is a no-op.
//!
//! - `api_client_requests_total` (counter): label `outcome`
//! - `api_client_request_duration_seconds` (histogram): label `outcome`
//! - `api_client_refresh_rounds_total` (counter): label `outcome`
//! - `api_client_auth_retries_total` (counter)

/// Record one executor call with its outcome (`success` or an error kind).
pub fn record_request(outcome: &'static str, duration_secs: f64) {
    metrics::counter!("api_client_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!("api_client_request_duration_seconds", "outcome" => outcome)
        .record(duration_secs);
}

/// Record a settled refresh round (`success` or `failure`).
pub fn record_refresh_round(outcome: &'static str) {
    metrics::counter!("api_client_refresh_rounds_total", "outcome" => outcome).increment(1);
}

/// Record a request replayed after a 401.
pub fn record_auth_retry() {
    metrics::counter!("api_client_auth_retries_total").increment(1);
}
