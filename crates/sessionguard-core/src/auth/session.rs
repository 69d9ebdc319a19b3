use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use super::CredentialStore;
use crate::models::User;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionStatus {
    Uninitialized,
    Initializing,
    Authenticated,
    Unauthenticated,
}

impl SessionStatus {
    /// Whether initialization has finished one way or the other.
    pub fn is_settled(&self) -> bool {
        matches!(self, SessionStatus::Authenticated | SessionStatus::Unauthenticated)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Uninitialized => "uninitialized",
            SessionStatus::Initializing => "initializing",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Unauthenticated => "unauthenticated",
        }
    }
}

/// Point-in-time view for the UI layer. Carries no token material.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub user: Option<User>,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
}

/// The session aggregate shared by the request pipeline, the refresh
/// coordinator, the scheduler and the navigation guard.
///
/// `Authenticated` is only ever published while both an access token and a
/// user are present.
pub struct SessionState {
    store: CredentialStore,
    user: RwLock<Option<User>>,
    status: watch::Sender<SessionStatus>,
}

impl SessionState {
    pub fn new(store: CredentialStore) -> Self {
        let (status, _) = watch::channel(SessionStatus::Uninitialized);
        Self {
            store,
            user: RwLock::new(None),
            status,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn is_authenticated(&self) -> bool {
        self.status() == SessionStatus::Authenticated
    }

    pub fn user(&self) -> Option<User> {
        self.user.read().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let tokens = self.store.get();
        SessionSnapshot {
            status: self.status(),
            user: self.user(),
            expires_at: tokens.expires_at,
            has_refresh_token: tokens.refresh_token.is_some(),
        }
    }

    /// Move `Uninitialized -> Initializing`. Returns false if initialization
    /// already started.
    pub fn begin_initializing(&self) -> bool {
        self.status.send_if_modified(|status| {
            if *status == SessionStatus::Uninitialized {
                *status = SessionStatus::Initializing;
                true
            } else {
                false
            }
        })
    }

    /// Publish `Authenticated` for `user`. Refused when no access token is held.
    pub fn authenticate(&self, user: User) -> bool {
        if !self.store.has_access() {
            debug!("Refusing to authenticate a session without an access token");
            return false;
        }
        info!(user_id = %user.id, username = %user.username, "Session authenticated");
        *self.user.write() = Some(user);
        self.status.send_replace(SessionStatus::Authenticated);
        true
    }

    /// Tear the session down: credentials, persisted copy and user are dropped
    /// and the status becomes `Unauthenticated`.
    ///
    /// Safe to call concurrently with in-flight requests; they simply find no
    /// credentials.
    pub fn invalidate(&self) {
        self.store.clear();
        *self.user.write() = None;
        let changed = self.status.send_if_modified(|status| {
            if *status == SessionStatus::Unauthenticated {
                false
            } else {
                *status = SessionStatus::Unauthenticated;
                true
            }
        });
        if changed {
            info!("Session ended");
        }
    }

    /// Suspend until initialization has settled and return the settled status.
    pub async fn ready(&self) -> SessionStatus {
        let mut rx = self.subscribe();
        let settled = match rx.wait_for(|status| status.is_settled()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        settled
    }
}
