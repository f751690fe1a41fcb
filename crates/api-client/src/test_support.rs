//! In-process mock of the Property237 backend for tests.
//!
//! Routes (under `/api`):
//! - `POST /auth/token/refresh/` issues `at_fresh` (configurable status/delay)
//! - `GET  /protected/` 200 only for `Bearer at_fresh`, else 401
//! - `GET  /always-401/` always 401
//! - `GET  /public/` JSON, `/text/` text/plain, `/empty/` 204
//! - `GET  /server-error/` 500 with JSON detail
//! - `GET  /slow/?ms=N` text after N milliseconds
//! - `ANY  /echo/`, `POST /auth/signup/` echo method, headers and body
//! - `POST /auth/login/` (401 on a wrong password), `/auth/otp/request/`,
//!   `/auth/otp/verify/`, `/auth/logout/`
//! - `POST /auth/password/reset/request/`, `/auth/password/reset/confirm/`
//!   (accepts token `reset-token` only)

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use serde_json::json;
use tokio::net::TcpListener;

pub const ISSUED_ACCESS: &str = "at_fresh";

#[derive(Clone)]
pub struct MockOptions {
    pub refresh_status: u16,
    pub refresh_delay: Duration,
    pub rotate_refresh: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            refresh_status: 200,
            refresh_delay: Duration::ZERO,
            rotate_refresh: false,
        }
    }
}

#[derive(Default)]
struct Counters {
    refresh: AtomicUsize,
    protected: AtomicUsize,
    always_401: AtomicUsize,
    login_saw_authorization: AtomicBool,
    reset_saw_authorization: AtomicBool,
    last_reset_identifier: Mutex<Option<String>>,
    last_refresh_token: Mutex<Option<String>>,
    last_logout_token: Mutex<Option<String>>,
}

#[derive(Clone)]
struct MockState {
    options: MockOptions,
    counters: Arc<Counters>,
}

pub struct MockBackend {
    pub base_url: String,
    counters: Arc<Counters>,
}

impl MockBackend {
    pub async fn start() -> Self {
        Self::start_with(MockOptions::default()).await
    }

    pub async fn start_with(options: MockOptions) -> Self {
        let counters = Arc::new(Counters::default());
        let state = MockState {
            options,
            counters: counters.clone(),
        };

        let api = Router::new()
            .route("/auth/token/refresh/", post(refresh))
            .route("/auth/login/", post(login))
            .route("/auth/signup/", post(echo))
            .route("/auth/otp/request/", post(otp_request))
            .route("/auth/otp/verify/", post(otp_verify))
            .route("/auth/logout/", post(logout))
            .route("/auth/password/reset/request/", post(password_reset_request))
            .route("/auth/password/reset/confirm/", post(password_reset_confirm))
            .route("/protected/", get(protected))
            .route("/always-401/", get(always_401))
            .route("/public/", get(|| async { Json(json!({"status": "ok"})) }))
            .route("/text/", get(|| async { "plain response" }))
            .route("/empty/", get(|| async { StatusCode::NO_CONTENT }))
            .route("/server-error/", get(server_error))
            .route("/slow/", get(slow))
            .route("/echo/", any(echo))
            .with_state(state);
        let app = Router::new().nest("/api", api);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}/api"),
            counters,
        }
    }

    pub fn refresh_calls(&self) -> usize {
        self.counters.refresh.load(Ordering::SeqCst)
    }

    pub fn protected_calls(&self) -> usize {
        self.counters.protected.load(Ordering::SeqCst)
    }

    pub fn always_401_calls(&self) -> usize {
        self.counters.always_401.load(Ordering::SeqCst)
    }

    pub fn login_saw_authorization(&self) -> bool {
        self.counters.login_saw_authorization.load(Ordering::SeqCst)
    }

    pub fn reset_saw_authorization(&self) -> bool {
        self.counters.reset_saw_authorization.load(Ordering::SeqCst)
    }

    pub fn last_reset_identifier(&self) -> Option<String> {
        self.counters.last_reset_identifier.lock().unwrap().clone()
    }

    pub fn last_refresh_token(&self) -> Option<String> {
        self.counters.last_refresh_token.lock().unwrap().clone()
    }

    pub fn last_logout_token(&self) -> Option<String> {
        self.counters.last_logout_token.lock().unwrap().clone()
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": "Given token not valid for any token type"})),
    )
        .into_response()
}

async fn refresh(State(state): State<MockState>, Json(body): Json<serde_json::Value>) -> Response {
    state.counters.refresh.fetch_add(1, Ordering::SeqCst);
    *state.counters.last_refresh_token.lock().unwrap() =
        body["refresh"].as_str().map(str::to_owned);
    tokio::time::sleep(state.options.refresh_delay).await;

    let status = StatusCode::from_u16(state.options.refresh_status).unwrap();
    if !status.is_success() {
        return (status, Json(json!({"detail": "Token is invalid or expired"}))).into_response();
    }
    if state.options.rotate_refresh {
        Json(json!({"access": ISSUED_ACCESS, "refresh": "rt_rotated"})).into_response()
    } else {
        Json(json!({"access": ISSUED_ACCESS})).into_response()
    }
}

async fn protected(State(state): State<MockState>, headers: HeaderMap) -> Response {
    state.counters.protected.fetch_add(1, Ordering::SeqCst);
    let expected = format!("Bearer {ISSUED_ACCESS}");
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Json(json!({"token": ISSUED_ACCESS})).into_response(),
        _ => unauthorized(),
    }
}

async fn always_401(State(state): State<MockState>) -> Response {
    state.counters.always_401.fetch_add(1, Ordering::SeqCst);
    unauthorized()
}

async fn server_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"detail": "database unavailable"})),
    )
        .into_response()
}

async fn slow(Query(params): Query<HashMap<String, String>>) -> &'static str {
    let ms = params
        .get("ms")
        .and_then(|v| v.parse().ok())
        .unwrap_or(100);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "slow done"
}

async fn login(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if headers.contains_key("authorization") {
        state
            .counters
            .login_saw_authorization
            .store(true, Ordering::SeqCst);
    }
    if body["password"] != "hunter2" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "message": "Invalid credentials"})),
        )
            .into_response();
    }
    Json(json!({
        "success": true,
        "message": "Login successful",
        "user": {"id": 1, "email": body["identifier"], "user_type": "tenant"},
        "tokens": {"access": "at_login", "refresh": "rt_login"},
    }))
    .into_response()
}

async fn otp_request(Json(body): Json<serde_json::Value>) -> Response {
    Json(json!({
        "success": true,
        "message": format!("OTP sent to {}", body["recipient"].as_str().unwrap_or_default()),
    }))
    .into_response()
}

async fn otp_verify(Json(body): Json<serde_json::Value>) -> Response {
    if body["otp_code"] != "123456" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "Invalid OTP"})),
        )
            .into_response();
    }
    Json(json!({
        "success": true,
        "message": "OTP verified",
        "user": {"id": 2, "phone_number": body["recipient"]},
        "tokens": {"access": "at_otp", "refresh": "rt_otp"},
    }))
    .into_response()
}

async fn password_reset_request(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if headers.contains_key("authorization") {
        state
            .counters
            .reset_saw_authorization
            .store(true, Ordering::SeqCst);
    }
    *state.counters.last_reset_identifier.lock().unwrap() =
        body["identifier"].as_str().map(str::to_owned);
    Json(json!({
        "success": true,
        "message": "If an account exists, reset instructions have been sent",
    }))
    .into_response()
}

async fn password_reset_confirm(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if headers.contains_key("authorization") {
        state
            .counters
            .reset_saw_authorization
            .store(true, Ordering::SeqCst);
    }
    if body["token"] != "reset-token" || body["new_password"] != body["new_password_confirm"] {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "Invalid or expired reset token"})),
        )
            .into_response();
    }
    Json(json!({"success": true, "message": "Password reset successfully"})).into_response()
}

async fn logout(State(state): State<MockState>, Json(body): Json<serde_json::Value>) -> Response {
    *state.counters.last_logout_token.lock().unwrap() =
        body["refresh_token"].as_str().map(str::to_owned);
    Json(json!({"success": true})).into_response()
}

async fn echo(request: Request<Body>) -> Response {
    let mut headers = serde_json::Map::new();
    for (name, value) in request.headers() {
        headers.insert(
            name.to_string(),
            serde_json::Value::String(value.to_str().unwrap_or("").to_string()),
        );
    }
    let method = request.method().to_string();
    let body = axum::body::to_bytes(request.into_body(), 1024 * 1024)
        .await
        .unwrap();
    Json(json!({
        "method": method,
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    }))
    .into_response()
}
