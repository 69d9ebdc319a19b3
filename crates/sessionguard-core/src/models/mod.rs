//! Wire models for the identity service.
//!
//! - `User`, `ProfileUpdate`: the authenticated principal
//! - Auth types: login, refresh, validate, password and session payloads
//! - Authz types: `AuthorizationRequest` and the server's `Decision`

pub mod auth;
pub mod authz;
pub mod user;

pub use auth::{
    ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse, PasswordChangeRequest,
    RefreshRequest, RefreshResponse, ResetPasswordRequest, SessionInfo, SessionsResponse,
    ValidateResponse,
};
pub use authz::{
    AuthorizationRequest, AuthorizationResponse, BulkAuthorizationRequest,
    BulkAuthorizationResponse, BulkSummary, Decision, Effect,
};
pub use user::{ProfileUpdate, User};
