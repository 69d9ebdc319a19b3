//! Session lifecycle management.
//!
//! `SessionManager` owns the pieces that make up a client session (credential
//! store, shared session state, refresh coordinator, request pipeline and
//! auto-refresh task) and drives the status transitions:
//!
//! ```text
//! Uninitialized -> Initializing -> Authenticated | Unauthenticated
//! Authenticated <-> Unauthenticated   (login, logout, refresh failure)
//! ```

use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::api::endpoints::REFRESH_PATH;
use crate::api::{ApiClient, ApiError, RefreshCoordinator};
use crate::auth::{claims, storage, CredentialStore, SessionState, SessionStatus, TokenStorage};
use crate::config::Config;
use crate::guard::{GuardConfig, NavigationGuard};
use crate::models::{
    AuthorizationRequest, AuthorizationResponse, BulkAuthorizationResponse,
    ForgotPasswordRequest, LoginRequest, MessageResponse, PasswordChangeRequest, ProfileUpdate,
    ResetPasswordRequest, SessionInfo, User,
};
use crate::scheduler::AutoRefresh;

pub struct SessionManager {
    config: Config,
    session: Arc<SessionState>,
    refresher: RefreshCoordinator,
    api: ApiClient,
    scheduler: Mutex<Option<AutoRefresh>>,
}

impl SessionManager {
    /// Build a manager around the given persistence backend.
    pub fn new(config: Config, storage: Arc<dyn TokenStorage>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        let session = Arc::new(SessionState::new(CredentialStore::new(storage)));
        let refresher = RefreshCoordinator::new(
            client.clone(), // Cheap clone, shares connection pool
            config.endpoint(REFRESH_PATH),
            Arc::clone(&session),
        );
        let api = ApiClient::new(client, &config, Arc::clone(&session), refresher.clone());

        Ok(Self {
            config,
            session,
            refresher,
            api,
            scheduler: Mutex::new(None),
        })
    }

    /// Build a manager using the storage backend named in the config.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let storage = storage::from_config(&config).context("Failed to open token storage")?;
        Self::new(config, storage).context("Failed to create HTTP client")
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn user(&self) -> Option<User> {
        self.session.user()
    }

    /// Navigation guard bound to this session.
    pub fn guard(&self, config: GuardConfig) -> NavigationGuard {
        NavigationGuard::new(Arc::clone(&self.session), config)
    }

    pub fn scheduler_running(&self) -> bool {
        self.scheduler
            .lock()
            .as_ref()
            .map(AutoRefresh::is_running)
            .unwrap_or(false)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Restore persisted credentials and validate them with the backend.
    ///
    /// Runs once; later calls return the current status.
    pub async fn initialize(&self) -> SessionStatus {
        if !self.session.begin_initializing() {
            return self.status();
        }
        info!("Restoring session");

        if !self.session.store().restore() {
            debug!("No persisted credentials");
            self.session.invalidate();
            return self.status();
        }

        let user = match self.api.validate().await {
            Ok(validation) if validation.valid => self.resolve_user(validation.user_id).await,
            Ok(validation) => {
                info!(reason = ?validation.error_message, "Persisted credentials are no longer valid");
                None
            }
            Err(e) if e.is_offline() && !self.session.store().is_expired() => {
                warn!(error = %e, "Identity service unreachable, trusting persisted credentials");
                self.user_from_token()
            }
            Err(e) => {
                info!(error = %e, "Persisted credentials rejected");
                None
            }
        };

        let authenticated = match user {
            Some(user) => self.session.authenticate(user),
            None => false,
        };
        if authenticated {
            self.start_scheduler();
        } else {
            self.session.invalidate();
        }
        self.status()
    }

    /// Authenticate with username/password and start a fresh session.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<User, ApiError> {
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
            remember_me,
        };
        let response = match self.api.login(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Login failed");
                return Err(e);
            }
        };

        self.stop_scheduler();
        if response.refresh_token.is_none() {
            warn!("Login returned no refresh token; the session ends when the access token does");
        }
        self.session.store().set(
            response.access_token,
            response.refresh_token,
            response.expires_in.map(std::time::Duration::from_secs),
        );

        let user = match response.user {
            Some(user) => user,
            None => match self.user_from_token() {
                Some(user) => user,
                None => match self.api.profile().await {
                    Ok(user) => user,
                    Err(e) => {
                        warn!(error = %e, "Could not load profile after login");
                        self.session.invalidate();
                        return Err(e);
                    }
                },
            },
        };

        if !self.session.authenticate(user.clone()) {
            // Credentials vanished between storing and publishing (concurrent logout).
            self.session.invalidate();
            return Err(ApiError::NotAuthenticated);
        }
        self.start_scheduler();
        info!(username = %user.username, "Login successful");
        Ok(user)
    }

    /// End the session. The server is told best-effort; local state is always
    /// cleared.
    pub async fn logout(&self) {
        if self.session.store().has_access() {
            if let Err(e) = self.api.logout().await {
                warn!(error = %e, "Server-side logout failed, clearing local session anyway");
            }
        }
        self.end_local_session();
        info!("Logged out");
    }

    /// Refresh the access token right away.
    pub async fn refresh_now(&self) -> Result<(), ApiError> {
        self.refresher
            .try_refresh()
            .await
            .map_err(ApiError::TokenInvalid)
    }

    fn end_local_session(&self) {
        self.stop_scheduler();
        self.session.invalidate();
    }

    fn start_scheduler(&self) {
        let task = AutoRefresh::start(
            Arc::clone(&self.session),
            self.refresher.clone(),
            self.config.refresh_interval(),
            self.config.expiry_window(),
        );
        // Replacing the slot drops (and stops) any previous task.
        *self.scheduler.lock() = Some(task);
    }

    fn stop_scheduler(&self) {
        if let Some(task) = self.scheduler.lock().take() {
            task.stop();
        }
    }

    /// Profile from the server, falling back to token claims when the
    /// profile endpoint fails for a reason other than authentication.
    async fn resolve_user(&self, user_id: Option<String>) -> Option<User> {
        match self.api.profile().await {
            Ok(user) => Some(user),
            Err(e) if e.is_auth_failure() => {
                info!(error = %e, "Profile request rejected");
                None
            }
            Err(e) => {
                warn!(error = %e, "Could not load profile, using token claims");
                self.user_from_token().or_else(|| {
                    user_id.map(|id| User {
                        username: id.clone(),
                        id,
                        roles: Default::default(),
                        permissions: Default::default(),
                        email: None,
                        display_name: None,
                    })
                })
            }
        }
    }

    fn user_from_token(&self) -> Option<User> {
        let token = self.session.store().access_token()?;
        claims::decode(&token).and_then(|c| User::from_claims(&c))
    }

    /// Fail fast for operations that need a session.
    fn require_session(&self) -> Result<(), ApiError> {
        if self.session.store().has_access() {
            Ok(())
        } else {
            Err(ApiError::NotAuthenticated)
        }
    }

    // =========================================================================
    // Profile and password
    // =========================================================================

    pub async fn profile(&self) -> Result<User, ApiError> {
        self.require_session()?;
        self.api.profile().await
    }

    /// Update the profile and publish the result to the session.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        self.require_session()?;
        let user = self.api.update_profile(update).await?;
        if self.session.is_authenticated() {
            self.session.authenticate(user.clone());
        }
        Ok(user)
    }

    /// Change the password. The server ends every session on success, so the
    /// local session is ended as well.
    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<MessageResponse, ApiError> {
        self.require_session()?;
        let request = PasswordChangeRequest {
            current_password: current_password.to_string(),
            new_password: new_password.to_string(),
        };
        let response = self.api.change_password(&request).await?;
        info!("Password changed, ending session");
        self.end_local_session();
        Ok(response)
    }

    pub async fn forgot_password(&self, email: &str) -> Result<MessageResponse, ApiError> {
        self.api
            .forgot_password(&ForgotPasswordRequest {
                email: email.to_string(),
            })
            .await
    }

    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<MessageResponse, ApiError> {
        self.api
            .reset_password(&ResetPasswordRequest {
                token: token.to_string(),
                new_password: new_password.to_string(),
            })
            .await
    }

    // =========================================================================
    // Server-side sessions
    // =========================================================================

    pub async fn sessions(&self) -> Result<Vec<SessionInfo>, ApiError> {
        self.require_session()?;
        Ok(self.api.sessions().await?.sessions)
    }

    pub async fn end_session(&self, session_id: &str) -> Result<MessageResponse, ApiError> {
        self.require_session()?;
        self.api.end_session(session_id).await
    }

    /// End every session of this user, including this one.
    pub async fn end_all_sessions(&self) -> Result<MessageResponse, ApiError> {
        self.require_session()?;
        let response = self.api.end_all_sessions().await?;
        self.end_local_session();
        Ok(response)
    }

    // =========================================================================
    // Authorization
    // =========================================================================

    /// Ask the policy service for a decision. The decision is consumed as-is.
    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationResponse, ApiError> {
        self.require_session()?;
        let response = self.api.authorize(request).await?;
        debug!(
            resource = %request.resource,
            action = %request.action,
            effect = ?response.decision.effect,
            cache_hit = response.decision.cache_hit,
            "Authorization decision"
        );
        Ok(response)
    }

    pub async fn authorize_bulk(
        &self,
        requests: Vec<AuthorizationRequest>,
    ) -> Result<BulkAuthorizationResponse, ApiError> {
        self.require_session()?;
        self.api.authorize_bulk(requests).await
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_scheduler();
    }
}
