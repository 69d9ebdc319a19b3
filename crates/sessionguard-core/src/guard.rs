//! Navigation guard.
//!
//! Routes declare what they need (`Route`), the guard compares that against
//! the session and returns a `NavigationDecision`. The UI layer performs the
//! actual navigation.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::auth::{SessionState, SessionStatus};
use crate::models::User;

/// Requirements of one navigable route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    pub requires_auth: bool,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
    pub hide_when_authenticated: bool,
}

impl Route {
    pub fn public(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            requires_auth: false,
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
            hide_when_authenticated: false,
        }
    }

    pub fn protected(path: impl Into<String>) -> Self {
        Self {
            requires_auth: true,
            ..Self::public(path)
        }
    }

    /// Every listed role is required. Implies authentication.
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self.requires_auth = true;
        self
    }

    /// Every listed permission is required. Implies authentication.
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions
            .extend(permissions.into_iter().map(Into::into));
        self.requires_auth = true;
        self
    }

    /// Login-style pages: an authenticated session is sent to the landing route.
    pub fn hide_when_authenticated(mut self) -> Self {
        self.hide_when_authenticated = true;
        self
    }

    fn matches_prefix(&self, path: &str) -> bool {
        let base = self.path.trim_end_matches('/');
        !base.is_empty()
            && path
                .strip_prefix(base)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    pub login_path: String,
    pub landing_path: String,
    pub unauthorized_path: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            landing_path: "/dashboard".to_string(),
            unauthorized_path: "/unauthorized".to_string(),
        }
    }
}

/// Outcome of a navigation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum NavigationDecision {
    Proceed,
    /// Send the user to login, remembering where they were going.
    RedirectToLogin { path: String, redirect: String },
    Redirect { path: String },
}

impl NavigationDecision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, NavigationDecision::Proceed)
    }

    /// Location to navigate to, or `None` to stay on the requested route.
    pub fn target(&self) -> Option<String> {
        match self {
            NavigationDecision::Proceed => None,
            NavigationDecision::RedirectToLogin { path, redirect } => Some(format!(
                "{}?redirect={}",
                path,
                urlencoding::encode(redirect)
            )),
            NavigationDecision::Redirect { path } => Some(path.clone()),
        }
    }
}

/// Known routes. Lookup is exact first, then the longest path prefix; paths
/// nobody declared are treated as protected.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn resolve(&self, path: &str) -> Route {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        if let Some(route) = self.routes.iter().find(|r| r.path == path) {
            return route.clone();
        }
        self.routes
            .iter()
            .filter(|r| r.matches_prefix(path))
            .max_by_key(|r| r.path.len())
            .map(|r| Route {
                path: path.to_string(),
                ..r.clone()
            })
            .unwrap_or_else(|| Route::protected(path))
    }
}

pub struct NavigationGuard {
    session: Arc<SessionState>,
    config: GuardConfig,
}

impl NavigationGuard {
    pub fn new(session: Arc<SessionState>, config: GuardConfig) -> Self {
        Self { session, config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Wait for session initialization to settle, then decide.
    pub async fn check(&self, route: &Route) -> NavigationDecision {
        let status = self.session.ready().await;
        let user = self.session.user();
        let decision = decide(&self.config, route, status, user.as_ref());
        debug!(path = %route.path, status = status.label(), ?decision, "Navigation checked");
        decision
    }
}

/// Pure decision for an already settled status.
pub fn decide(
    config: &GuardConfig,
    route: &Route,
    status: SessionStatus,
    user: Option<&User>,
) -> NavigationDecision {
    let authenticated = status == SessionStatus::Authenticated && user.is_some();

    if route.hide_when_authenticated && authenticated {
        return NavigationDecision::Redirect {
            path: config.landing_path.clone(),
        };
    }

    if !route.requires_auth {
        return NavigationDecision::Proceed;
    }

    let Some(user) = user.filter(|_| authenticated) else {
        return NavigationDecision::RedirectToLogin {
            path: config.login_path.clone(),
            redirect: route.path.clone(),
        };
    };

    if !user.has_all_roles(&route.roles) || !user.has_all_permissions(&route.permissions) {
        return NavigationDecision::Redirect {
            path: config.unauthorized_path.clone(),
        };
    }

    NavigationDecision::Proceed
}
