//! Request pipeline for calls to the identity service.
//!
//! Every outbound call goes through `ApiClient::execute`, which attaches the
//! bearer token, turns one 401 into a refresh-and-retry and one 429 into a
//! backoff-and-retry. Anything else is handed back to the caller as a
//! classified `ApiError`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::{ApiError, RefreshCoordinator};
use crate::auth::SessionState;
use crate::config::{join_url, Config};

/// One logical request. Kept around so it can be reissued verbatim.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
    authenticated: bool,
    refresh_on_unauthorized: bool,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            authenticated: true,
            refresh_on_unauthorized: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Send without credentials (login, password reset).
    pub fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self.refresh_on_unauthorized = false;
        self
    }

    /// Surface a 401 immediately instead of refreshing (logout).
    pub fn without_refresh(mut self) -> Self {
        self.refresh_on_unauthorized = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// API client for the identity service.
/// Clone is cheap - reqwest::Client and the session are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
    session: Arc<SessionState>,
    refresher: RefreshCoordinator,
    rate_limit_delay: Duration,
    max_rate_limit_delay: Duration,
}

impl ApiClient {
    pub fn new(
        client: Client,
        config: &Config,
        session: Arc<SessionState>,
        refresher: RefreshCoordinator,
    ) -> Self {
        Self {
            client,
            base_url: Arc::from(config.base_url.as_str()),
            session,
            refresher,
            rate_limit_delay: config.rate_limit_delay(),
            max_rate_limit_delay: config.max_rate_limit_delay(),
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Send a request through the pipeline.
    ///
    /// A 401 triggers at most one refresh and one retry; a 429 at most one
    /// backoff and one retry. A second failure of the same kind is returned.
    pub async fn execute(&self, spec: &RequestSpec) -> Result<Response, ApiError> {
        let mut retried_unauthorized = false;
        let mut retried_rate_limit = false;

        loop {
            let (response, sent_token) = self.send_once(spec).await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED
                && spec.refresh_on_unauthorized
                && !retried_unauthorized
            {
                retried_unauthorized = true;

                debug!(path = %spec.path, "Received 401, refreshing token");
                if self
                    .refresher
                    .refresh_stale(sent_token.as_deref())
                    .await
                    .is_ok()
                {
                    continue;
                }
                warn!(path = %spec.path, "Token refresh failed, surfacing 401");
                return Err(ApiError::Unauthorized);
            }

            if status == StatusCode::TOO_MANY_REQUESTS && !retried_rate_limit {
                retried_rate_limit = true;
                let delay = self.retry_delay(response.headers());
                warn!(
                    path = %spec.path,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Self::check_response(response).await;
        }
    }

    async fn send_once(&self, spec: &RequestSpec) -> Result<(Response, Option<String>), ApiError> {
        let mut request = self.client.request(spec.method.clone(), self.url(&spec.path));

        let token = if spec.authenticated {
            self.session.store().access_token()
        } else {
            None
        };
        if let Some(ref token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(ref body) = spec.body {
            request = request.json(body);
        }

        let started = Instant::now();
        let result = request.send().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                debug!(
                    method = %spec.method,
                    path = %spec.path,
                    status = response.status().as_u16(),
                    elapsed_ms,
                    "Request completed"
                );
                Ok((response, token))
            }
            Err(e) => {
                warn!(
                    method = %spec.method,
                    path = %spec.path,
                    elapsed_ms,
                    timeout = e.is_timeout(),
                    error = %e,
                    "Request failed"
                );
                Err(ApiError::Network(e))
            }
        }
    }

    /// Delay before retrying a 429: Retry-After (seconds or HTTP date) when
    /// present, otherwise the configured default. Capped at the configured max.
    fn retry_delay(&self, headers: &HeaderMap) -> Duration {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()))
            .unwrap_or(self.rate_limit_delay)
            .min(self.max_rate_limit_delay)
    }

    /// Check if response is successful, returning a classified error if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));
        let body = response.text().await.unwrap_or_default();
        match ApiError::from_status(status, &body) {
            ApiError::RateLimited { .. } => Err(ApiError::RateLimited { retry_after }),
            other => Err(other),
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e))
        })
    }

    // ===== Typed helpers =====

    pub async fn send_json<T: DeserializeOwned>(&self, spec: RequestSpec) -> Result<T, ApiError> {
        let response = self.execute(&spec).await?;
        Self::parse_json(response, &spec.path).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(RequestSpec::get(path)).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(RequestSpec::post(path).json(body)?).await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(RequestSpec::put(path).json(body)?).await
    }

    pub async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(RequestSpec::delete(path)).await
    }
}

/// Parse a Retry-After value: delta-seconds or an HTTP date.
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
