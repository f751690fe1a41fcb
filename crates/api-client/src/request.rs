//! Request descriptors and decoded response bodies

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Decoded response body.
///
/// JSON when the response declared `application/json` and parsed, raw text
/// otherwise. A zero-length body is `Empty` and decodes as JSON `null`, so
/// `()` and `Option<T>` work for 204 responses.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(serde_json::Value),
    Text(String),
    Empty,
}

impl Body {
    pub fn into_value(self) -> serde_json::Value {
        match self {
            Body::Json(value) => value,
            Body::Text(text) => serde_json::Value::String(text),
            Body::Empty => serde_json::Value::Null,
        }
    }

    /// Deserialize into the caller's type. Text bodies decode as a JSON string.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        serde_json::from_value(self.into_value()).map_err(|e| Error::Decode(e.to_string()))
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Json(value) => write!(f, "{value}"),
            Body::Text(text) => write!(f, "{text}"),
            Body::Empty => write!(f, "<empty>"),
        }
    }
}

/// Caller-supplied shape of a request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Bytes>,
    /// Overrides the client's default timeout for this call.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON request body.
    pub fn json<B: Serialize + ?Sized>(mut self, value: &B) -> Result<Self> {
        let encoded = serde_json::to_vec(value)
            .map_err(|e| Error::InvalidRequest(format!("serializing request body: {e}")))?;
        self.body = Some(Bytes::from(encoded));
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Fully formed request handed to the executor.
///
/// Built once per logical call by the client. Header names are stored
/// lower-cased so a caller override and a client default never both reach
/// the wire.
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Bytes>,
    pub timeout: Duration,
    pub requires_auth: bool,
    pub request_id: String,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout,
            requires_auth: true,
            request_id: format!("req_{}", uuid::Uuid::new_v4().simple()),
        }
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Replace the `Authorization` header with a bearer credential.
    pub fn set_bearer(&mut self, access_token: &str) {
        self.set_header("authorization", format!("Bearer {access_token}"));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

// Header values may hold a bearer token; only names are printed.
impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("timeout", &self.timeout)
            .field("requires_auth", &self.requires_auth)
            .field("request_id", &self.request_id)
            .finish()
    }
}
