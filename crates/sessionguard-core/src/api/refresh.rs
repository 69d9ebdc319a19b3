//! Single-flight token refresh.
//!
//! Every path that wants a fresh access token (a request that got a 401, the
//! auto-refresh scheduler, an explicit refresh) goes through one
//! `RefreshCoordinator`. While a refresh is in flight, further callers join
//! it instead of issuing their own call, so N concurrent 401s cost exactly one
//! round trip to the identity service.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::SessionState;
use crate::models::{RefreshRequest, RefreshResponse};

/// Why a refresh did not produce a new access token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("no refresh token available")]
    MissingRefreshToken,

    #[error("refresh token rejected (status {status})")]
    Rejected { status: u16 },

    #[error("refresh request failed: {0}")]
    Transport(String),

    #[error("malformed refresh response: {0}")]
    MalformedResponse(String),

    #[error("credentials changed while the refresh was in flight")]
    Superseded,
}

type RefreshResult = Result<(), RefreshFailure>;
type InFlight = Shared<BoxFuture<'static, RefreshResult>>;

/// Coordinates token refreshes for one session. Clone is cheap.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    client: Client,
    refresh_url: String,
    session: Arc<SessionState>,
    in_flight: Mutex<Option<InFlight>>,
    refresh_count: AtomicU64,
    rotation_warned: AtomicBool,
}

impl RefreshCoordinator {
    pub fn new(client: Client, refresh_url: String, session: Arc<SessionState>) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                refresh_url,
                session,
                in_flight: Mutex::new(None),
                refresh_count: AtomicU64::new(0),
                rotation_warned: AtomicBool::new(false),
            }),
        }
    }

    /// Refresh the access token. Returns whether a new token is in the store.
    pub async fn refresh(&self) -> bool {
        self.try_refresh().await.is_ok()
    }

    /// Refresh the access token, reporting why it failed.
    ///
    /// The refresh runs on its own task: it completes and updates the store
    /// even if every caller stops waiting.
    pub async fn try_refresh(&self) -> RefreshResult {
        self.refresh_stale(None).await
    }

    /// Refresh because `sent_token` was rejected.
    ///
    /// If the store already holds a different access token and no refresh is
    /// in flight, the rejected token was rotated by an earlier refresh and no
    /// new one is started. The check runs under the in-flight lock, which the
    /// refresh task also holds when it finishes.
    pub async fn refresh_stale(&self, sent_token: Option<&str>) -> RefreshResult {
        let flight = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Joining in-flight token refresh");
                    existing.clone()
                }
                None if self.inner.already_rotated(sent_token) => {
                    debug!("Rejected token was already replaced, skipping refresh");
                    return Ok(());
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    // The task clears the slot under the same lock, so it
                    // cannot run before the future is stored below.
                    let task = tokio::spawn(async move {
                        let result = inner.run().await;
                        inner.in_flight.lock().take();
                        result
                    });
                    let flight = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(RefreshFailure::Transport(format!("refresh task failed: {}", e)))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Number of refresh calls actually sent to the identity service.
    pub fn refresh_count(&self) -> u64 {
        self.inner.refresh_count.load(Ordering::Relaxed)
    }
}

impl Inner {
    fn already_rotated(&self, sent_token: Option<&str>) -> bool {
        let Some(sent) = sent_token else {
            return false;
        };
        self.session
            .store()
            .access_token()
            .is_some_and(|current| current != sent)
    }

    async fn run(&self) -> RefreshResult {
        let store = self.session.store();
        let Some(refresh_token) = store.refresh_token() else {
            info!("No refresh token available, ending session");
            self.session.invalidate();
            return Err(RefreshFailure::MissingRefreshToken);
        };

        self.refresh_count.fetch_add(1, Ordering::Relaxed);
        debug!("Refreshing access token");

        let tokens = match self.request_tokens(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(failure) => {
                warn!(error = %failure, "Token refresh failed, ending session");
                if store.refresh_token().as_deref() == Some(refresh_token.as_str()) {
                    self.session.invalidate();
                }
                return Err(failure);
            }
        };

        let rotated = tokens.refresh_token.as_deref().is_some_and(|t| !t.is_empty());
        if !rotated && !self.rotation_warned.swap(true, Ordering::Relaxed) {
            warn!("Identity service did not rotate the refresh token; the existing one stays in use");
        }

        let applied = store.update_access(
            &refresh_token,
            tokens.access_token,
            tokens.refresh_token,
            tokens.expires_in.map(Duration::from_secs),
        );
        if !applied {
            return Err(RefreshFailure::Superseded);
        }
        info!(rotated, "Access token refreshed");
        Ok(())
    }

    async fn request_tokens(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshFailure> {
        let response = self
            .client
            .post(&self.refresh_url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshFailure::Rejected {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| RefreshFailure::Transport(e.to_string()))?;
        let tokens: RefreshResponse = serde_json::from_str(&body)
            .map_err(|e| RefreshFailure::MalformedResponse(e.to_string()))?;
        if tokens.access_token.is_empty() {
            return Err(RefreshFailure::MalformedResponse(
                "empty access token".to_string(),
            ));
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialStore, SessionStatus};

    #[tokio::test]
    async fn test_missing_refresh_token_fails_without_network() {
        let session = Arc::new(SessionState::new(CredentialStore::in_memory()));
        session.store().set("a1".to_string(), None, None);
        // Unroutable URL: any network call would fail with Transport, not Missing
        let coordinator = RefreshCoordinator::new(
            Client::new(),
            "http://127.0.0.1:9/auth/refresh".to_string(),
            Arc::clone(&session),
        );

        assert_eq!(
            coordinator.try_refresh().await,
            Err(RefreshFailure::MissingRefreshToken)
        );
        assert_eq!(coordinator.refresh_count(), 0);
        assert!(!session.store().has_access());
        assert_eq!(session.status(), SessionStatus::Unauthenticated);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_transport_failure_clears_session() {
        let session = Arc::new(SessionState::new(CredentialStore::in_memory()));
        session.store().set("a1".to_string(), Some("r1".to_string()), None);
        let coordinator = RefreshCoordinator::new(
            Client::new(),
            "http://127.0.0.1:9/auth/refresh".to_string(),
            Arc::clone(&session),
        );

        assert!(!coordinator.refresh().await);
        assert_eq!(coordinator.refresh_count(), 1);
        assert!(!session.store().has_access());
        assert!(!session.store().has_refresh());
        assert_eq!(session.status(), SessionStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn test_rotated_token_skips_refresh() {
        let session = Arc::new(SessionState::new(CredentialStore::in_memory()));
        session.store().set("a2".to_string(), Some("r2".to_string()), None);
        let coordinator = RefreshCoordinator::new(
            Client::new(),
            "http://127.0.0.1:9/auth/refresh".to_string(),
            Arc::clone(&session),
        );

        // A 401 for "a1" arrives after "a2" is already stored
        assert_eq!(coordinator.refresh_stale(Some("a1")).await, Ok(()));
        assert_eq!(coordinator.refresh_count(), 0);
        assert_eq!(session.store().access_token().as_deref(), Some("a2"));
        assert!(session.store().has_refresh());
    }

    #[tokio::test]
    async fn test_current_token_rejected_starts_refresh() {
        let session = Arc::new(SessionState::new(CredentialStore::in_memory()));
        session.store().set("a1".to_string(), Some("r1".to_string()), None);
        let coordinator = RefreshCoordinator::new(
            Client::new(),
            "http://127.0.0.1:9/auth/refresh".to_string(),
            Arc::clone(&session),
        );

        assert!(matches!(
            coordinator.refresh_stale(Some("a1")).await,
            Err(RefreshFailure::Transport(_))
        ));
        assert_eq!(coordinator.refresh_count(), 1);
    }
}
