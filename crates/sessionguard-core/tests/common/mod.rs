//! In-process identity service used by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use sessionguard_core::auth::{CredentialStore, MemoryStorage, SessionState, TokenStorage};
use sessionguard_core::config::Config;
use sessionguard_core::{ApiClient, RefreshCoordinator, SessionManager};

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "secret";

/// Unsigned JWT with the given subject and lifetime.
pub fn make_token(sub: &str, expires_in_secs: i64, nonce: u32) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let payload = json!({
        "sub": sub,
        "username": USERNAME,
        "roles": ["user"],
        "permissions": ["profile:read"],
        "exp": chrono::Utc::now().timestamp() + expires_in_secs,
        "jti": nonce,
    });
    let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.sig", header, payload)
}

fn user_json() -> Value {
    json!({
        "id": 1,
        "username": USERNAME,
        "email": "alice@example.com",
        "roles": ["user"],
        "permissions": ["profile:read"],
    })
}

fn error_body(status: StatusCode, message: &str) -> Response {
    let body = json!({
        "error": {
            "code": status.as_u16(),
            "message": message,
            "timestamp": "2026-01-01T00:00:00Z",
        }
    });
    (status, Json(body)).into_response()
}

/// Server-side view of the world plus call counters.
pub struct Backend {
    pub access_token: Mutex<String>,
    pub refresh_token: Mutex<String>,
    pub token_ttl_secs: AtomicI64,
    pub rotate_refresh: AtomicBool,
    pub refresh_delay_ms: AtomicU64,
    /// Number of leading 429s `/limited` answers with.
    pub rate_limited_responses: AtomicU32,

    pub login_calls: AtomicU32,
    pub refresh_calls: AtomicU32,
    pub validate_calls: AtomicU32,
    pub logout_calls: AtomicU32,
    pub protected_calls: AtomicU32,
    pub unauthorized_calls: AtomicU32,
    pub limited_calls: AtomicU32,
    generation: AtomicU32,
}

impl Backend {
    fn new() -> Self {
        Self {
            access_token: Mutex::new(String::new()),
            refresh_token: Mutex::new(String::new()),
            token_ttl_secs: AtomicI64::new(3600),
            rotate_refresh: AtomicBool::new(true),
            refresh_delay_ms: AtomicU64::new(50),
            rate_limited_responses: AtomicU32::new(1),
            login_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            validate_calls: AtomicU32::new(0),
            logout_calls: AtomicU32::new(0),
            protected_calls: AtomicU32::new(0),
            unauthorized_calls: AtomicU32::new(0),
            limited_calls: AtomicU32::new(0),
            generation: AtomicU32::new(0),
        }
    }

    /// Mint a new access token (and refresh token) the server will accept.
    pub fn issue(&self, with_refresh: bool) -> (String, Option<String>) {
        let n = self.generation.fetch_add(1, Ordering::SeqCst);
        let access = make_token("1", self.token_ttl_secs.load(Ordering::SeqCst), n);
        *self.access_token.lock() = access.clone();
        let refresh = with_refresh.then(|| {
            let refresh = format!("refresh-{}", n);
            *self.refresh_token.lock() = refresh.clone();
            refresh
        });
        (access, refresh)
    }

    /// Server-side revocation of the refresh token.
    pub fn revoke_refresh(&self) {
        self.refresh_token.lock().clear();
    }

    /// Make the current access token unacceptable without touching the
    /// refresh token.
    pub fn expire_access(&self) {
        self.access_token.lock().clear();
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let current = self.access_token.lock().clone();
        !current.is_empty()
            && headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                == Some(current.as_str())
    }
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub backend: Arc<Backend>,
}

impl MockServer {
    pub async fn start() -> Self {
        let backend = Arc::new(Backend::new());
        let api = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/refresh", post(refresh))
            .route("/auth/validate", get(validate))
            .route("/auth/logout", post(logout))
            .route("/users/me", get(profile))
            .route("/authz/authorize", post(authorize))
            .route("/protected", get(protected))
            .route("/slow", get(slow))
            .route("/always-unauthorized", get(always_unauthorized))
            .route("/limited", get(limited))
            .route("/server-error", get(server_error))
            .with_state(Arc::clone(&backend));
        let app = Router::new().nest("/api/v1", api);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Self { addr, backend }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    pub fn config(&self) -> Config {
        Config {
            base_url: self.base_url(),
            request_timeout_secs: 5,
            rate_limit_delay_ms: 50,
            ..Config::default()
        }
    }

    pub fn manager(&self) -> SessionManager {
        self.manager_with(Arc::new(MemoryStorage::default()))
    }

    pub fn manager_with(&self, storage: Arc<dyn TokenStorage>) -> SessionManager {
        SessionManager::new(self.config(), storage).expect("manager")
    }

    /// Bare pipeline without a manager. `seed` puts tokens in it.
    pub fn pipeline(&self) -> (Arc<SessionState>, ApiClient) {
        let config = self.config();
        let session = Arc::new(SessionState::new(CredentialStore::in_memory()));
        let client = reqwest::Client::new();
        let refresher = RefreshCoordinator::new(
            client.clone(),
            config.endpoint("/auth/refresh"),
            Arc::clone(&session),
        );
        let api = ApiClient::new(client, &config, Arc::clone(&session), refresher);
        (session, api)
    }

    /// Log in server-side and put the resulting tokens in `session`.
    pub fn seed(&self, session: &SessionState) {
        let (access, refresh) = self.backend.issue(true);
        session.store().set(access, refresh, None);
    }

    pub fn refresh_calls(&self) -> u32 {
        self.backend.refresh_calls.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn login(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    backend.login_calls.fetch_add(1, Ordering::SeqCst);
    if body["username"] != USERNAME || body["password"] != PASSWORD {
        return error_body(StatusCode::UNAUTHORIZED, "Invalid username or password");
    }
    let (access, refresh) = backend.issue(true);
    Json(json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "expires_in": backend.token_ttl_secs.load(Ordering::SeqCst),
        "user": user_json(),
        "session_id": "sess-1",
    }))
    .into_response()
}

async fn refresh(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    backend.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = backend.refresh_delay_ms.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(delay)).await;

    let current = backend.refresh_token.lock().clone();
    if current.is_empty() || body["refresh_token"] != current.as_str() {
        return error_body(StatusCode::UNAUTHORIZED, "Invalid refresh token");
    }

    let rotate = backend.rotate_refresh.load(Ordering::SeqCst);
    let (access, refresh) = backend.issue(rotate);
    Json(json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "expires_in": backend.token_ttl_secs.load(Ordering::SeqCst),
    }))
    .into_response()
}

async fn validate(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    backend.validate_calls.fetch_add(1, Ordering::SeqCst);
    if !backend.authorized(&headers) {
        return error_body(StatusCode::UNAUTHORIZED, "Token expired");
    }
    Json(json!({ "valid": true, "user_id": 1, "scopes": ["profile:read"] })).into_response()
}

async fn logout(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    backend.logout_calls.fetch_add(1, Ordering::SeqCst);
    if !backend.authorized(&headers) {
        return error_body(StatusCode::UNAUTHORIZED, "Not authenticated");
    }
    backend.expire_access();
    backend.revoke_refresh();
    Json(json!({})).into_response()
}

async fn profile(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if !backend.authorized(&headers) {
        return error_body(StatusCode::UNAUTHORIZED, "Not authenticated");
    }
    Json(user_json()).into_response()
}

async fn authorize(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !backend.authorized(&headers) {
        return error_body(StatusCode::UNAUTHORIZED, "Not authenticated");
    }
    let effect = if body["action"] == "read" { "PERMIT" } else { "DENY" };
    Json(json!({
        "success": true,
        "decision": {
            "effect": effect,
            "reason": "policy evaluated",
            "obligations": [],
            "advice": [],
            "cache_hit": false,
            "evaluation_time_ms": 1.5,
        },
        "request_id": "req-1",
    }))
    .into_response()
}

async fn protected(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    backend.protected_calls.fetch_add(1, Ordering::SeqCst);
    if !backend.authorized(&headers) {
        return error_body(StatusCode::UNAUTHORIZED, "Token expired");
    }
    Json(json!({ "ok": true })).into_response()
}

async fn slow(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    tokio::time::sleep(Duration::from_millis(200)).await;
    if !backend.authorized(&headers) {
        return error_body(StatusCode::UNAUTHORIZED, "Token expired");
    }
    Json(json!({ "ok": true })).into_response()
}

async fn always_unauthorized(State(backend): State<Arc<Backend>>) -> Response {
    backend.unauthorized_calls.fetch_add(1, Ordering::SeqCst);
    error_body(StatusCode::UNAUTHORIZED, "Nope")
}

async fn limited(State(backend): State<Arc<Backend>>) -> Response {
    let n = backend.limited_calls.fetch_add(1, Ordering::SeqCst);
    if n < backend.rate_limited_responses.load(Ordering::SeqCst) {
        let mut response = error_body(StatusCode::TOO_MANY_REQUESTS, "Slow down");
        response
            .headers_mut()
            .insert("retry-after", axum::http::HeaderValue::from_static("1"));
        return response;
    }
    Json(json!({ "ok": true })).into_response()
}

async fn server_error() -> Response {
    error_body(StatusCode::INTERNAL_SERVER_ERROR, "Database unavailable")
}
