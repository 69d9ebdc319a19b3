//! Identity service endpoints.
//!
//! Thin typed wrappers over the request pipeline. Session bookkeeping
//! (storing tokens, publishing status) lives in `SessionManager`.

use super::client::RequestSpec;
use super::{ApiClient, ApiError};
use crate::models::{
    AuthorizationRequest, AuthorizationResponse, BulkAuthorizationRequest,
    BulkAuthorizationResponse, ForgotPasswordRequest, LoginRequest, LoginResponse,
    MessageResponse, PasswordChangeRequest, ProfileUpdate, ResetPasswordRequest, SessionsResponse,
    User, ValidateResponse,
};

// ============================================================================
// Paths
// ============================================================================

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const VALIDATE_PATH: &str = "/auth/validate";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const FORGOT_PASSWORD_PATH: &str = "/auth/forgot-password";
pub const RESET_PASSWORD_PATH: &str = "/auth/reset-password";
pub const PROFILE_PATH: &str = "/users/me";
pub const CHANGE_PASSWORD_PATH: &str = "/users/change-password";
pub const SESSIONS_PATH: &str = "/sessions/me";
pub const AUTHORIZE_PATH: &str = "/authz/authorize";
pub const AUTHORIZE_BULK_PATH: &str = "/authz/authorize/bulk";

impl ApiClient {
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        self.send_json(RequestSpec::post(LOGIN_PATH).json(request)?.anonymous())
            .await
    }

    /// Best-effort server-side logout. A 401 is not worth a refresh here.
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.execute(&RequestSpec::post(LOGOUT_PATH).without_refresh())
            .await
            .map(|_| ())
    }

    pub async fn validate(&self) -> Result<ValidateResponse, ApiError> {
        self.get_json(VALIDATE_PATH).await
    }

    pub async fn profile(&self) -> Result<User, ApiError> {
        self.get_json(PROFILE_PATH).await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        self.put_json(PROFILE_PATH, update).await
    }

    pub async fn change_password(
        &self,
        request: &PasswordChangeRequest,
    ) -> Result<MessageResponse, ApiError> {
        self.post_json(CHANGE_PASSWORD_PATH, request).await
    }

    pub async fn forgot_password(
        &self,
        request: &ForgotPasswordRequest,
    ) -> Result<MessageResponse, ApiError> {
        self.send_json(
            RequestSpec::post(FORGOT_PASSWORD_PATH)
                .json(request)?
                .anonymous(),
        )
        .await
    }

    pub async fn reset_password(
        &self,
        request: &ResetPasswordRequest,
    ) -> Result<MessageResponse, ApiError> {
        self.send_json(
            RequestSpec::post(RESET_PASSWORD_PATH)
                .json(request)?
                .anonymous(),
        )
        .await
    }

    pub async fn sessions(&self) -> Result<SessionsResponse, ApiError> {
        self.get_json(SESSIONS_PATH).await
    }

    pub async fn end_session(&self, session_id: &str) -> Result<MessageResponse, ApiError> {
        let path = format!("/sessions/{}", urlencoding::encode(session_id));
        self.delete_json(&path).await
    }

    pub async fn end_all_sessions(&self) -> Result<MessageResponse, ApiError> {
        self.delete_json("/sessions/all").await
    }

    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationResponse, ApiError> {
        self.post_json(AUTHORIZE_PATH, request).await
    }

    pub async fn authorize_bulk(
        &self,
        requests: Vec<AuthorizationRequest>,
    ) -> Result<BulkAuthorizationResponse, ApiError> {
        self.post_json(AUTHORIZE_BULK_PATH, &BulkAuthorizationRequest { requests })
            .await
    }
}
