//! REST API client module for the identity service.
//!
//! This module provides the `ApiClient` request pipeline, the single-flight
//! `RefreshCoordinator` it leans on when the backend answers 401, and typed
//! wrappers for the login, refresh, profile, session and authorization
//! endpoints.
//!
//! The API uses JWT bearer token authentication obtained through the
//! `/auth/login` endpoint and renewed through `/auth/refresh`.

pub mod client;
pub mod endpoints;
pub mod error;
pub mod refresh;

pub use client::{ApiClient, RequestSpec};
pub use error::ApiError;
pub use refresh::{RefreshCoordinator, RefreshFailure};
