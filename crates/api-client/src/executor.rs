//! Single-attempt request execution
//!
//! The executor turns a `RequestDescriptor` into one HTTP exchange and
//! classifies the outcome. It never retries: a 401 comes back as
//! `Error::Http { status: 401, .. }` and the client decides what to do.

use std::str::FromStr;
use std::time::Instant;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::metrics;
use crate::request::{Body, RequestDescriptor};

pub struct RequestExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl RequestExecutor {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Perform one call.
    ///
    /// The descriptor's timeout covers connect, send and body read. When it
    /// elapses the in-flight future is dropped, which aborts the connection,
    /// and `Error::Timeout` is returned. Other requests are unaffected.
    #[instrument(skip_all, fields(request_id = %descriptor.request_id, method = %descriptor.method, path = %descriptor.path))]
    pub async fn execute(&self, descriptor: &RequestDescriptor) -> Result<Body> {
        let started = Instant::now();
        let headers = header_map(descriptor)?;

        let mut request = self
            .client
            .request(descriptor.method.clone(), self.url_for(&descriptor.path))
            .headers(headers);
        if let Some(body) = &descriptor.body {
            request = request.body(body.clone());
        }

        let outcome = match tokio::time::timeout(descriptor.timeout, send(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = descriptor.timeout.as_millis() as u64,
                    "request deadline exceeded, aborting"
                );
                Err(Error::Timeout)
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        match &outcome {
            Ok(_) => {
                debug!(elapsed, "request succeeded");
                metrics::record_request("success", elapsed);
            }
            Err(e) => {
                debug!(elapsed, error = %e, "request failed");
                metrics::record_request(e.kind(), elapsed);
            }
        }
        outcome
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<Body> {
    let response = request.send().await.map_err(classify_transport)?;
    let status = response.status();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));

    let bytes = response.bytes().await.map_err(classify_transport)?;
    let body = decode_body(&bytes, is_json);

    if status.is_success() {
        Ok(body)
    } else {
        Err(Error::Http {
            status: status.as_u16(),
            body,
        })
    }
}

fn decode_body(bytes: &[u8], is_json: bool) -> Body {
    if bytes.is_empty() {
        return Body::Empty;
    }
    if is_json {
        match serde_json::from_slice(bytes) {
            Ok(value) => return Body::Json(value),
            Err(e) => debug!(error = %e, "declared JSON body did not parse, keeping raw text"),
        }
    }
    Body::Text(String::from_utf8_lossy(bytes).into_owned())
}

fn classify_transport(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else {
        Error::Network(e.to_string())
    }
}

fn header_map(descriptor: &RequestDescriptor) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(descriptor.headers.len());
    for (name, value) in &descriptor.headers {
        let header_name = HeaderName::from_str(name)
            .map_err(|e| Error::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidRequest(format!("header value for {name}: {e}")))?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}
