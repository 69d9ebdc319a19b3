//! Proactive token refresh.
//!
//! `AutoRefresh` owns a background task that wakes on a fixed interval and
//! refreshes the access token once it is inside the expiry window. It routes
//! through the same `RefreshCoordinator` as the 401 path, so the two never
//! race each other into duplicate refreshes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::api::RefreshCoordinator;
use crate::auth::{claims, SessionState, SessionStatus, TokenSet};

/// Handle to a running auto-refresh task. Dropping it stops the task.
pub struct AutoRefresh {
    handle: JoinHandle<()>,
}

impl AutoRefresh {
    pub fn start(
        session: Arc<SessionState>,
        refresher: RefreshCoordinator,
        interval: Duration,
        window: Duration,
    ) -> Self {
        info!(
            interval_secs = interval.as_secs(),
            window_secs = window.as_secs(),
            "Starting auto-refresh"
        );
        let handle = tokio::spawn(run(session, refresher, interval, window));
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        // Drop aborts the task.
    }
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            debug!("Stopping auto-refresh");
            self.handle.abort();
        }
    }
}

async fn run(
    session: Arc<SessionState>,
    refresher: RefreshCoordinator,
    interval: Duration,
    window: Duration,
) {
    let mut status_rx = session.subscribe();
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if session.status() != SessionStatus::Authenticated {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                check_once(&session, &refresher, window).await;
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Auto-refresh stopped");
}

/// Refresh now if the access token is inside the window. Returns whether a
/// refresh was attempted.
pub async fn check_once(
    session: &SessionState,
    refresher: &RefreshCoordinator,
    window: Duration,
) -> bool {
    let tokens = session.store().get();
    if !needs_refresh(&tokens, window) {
        return false;
    }
    debug!("Access token is about to expire, refreshing");
    refresher.refresh().await;
    true
}

/// The token's own `exp` decides; the stored expiry is the fallback for
/// tokens that do not decode.
fn needs_refresh(tokens: &TokenSet, window: Duration) -> bool {
    let Some(ref access) = tokens.access_token else {
        return false;
    };
    if claims::decode(access).and_then(|c| c.exp).is_some() {
        return claims::is_expiring_soon(access, window);
    }
    match tokens.expires_at {
        Some(at) => {
            let remaining = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            remaining < window
        }
        None => false,
    }
}
