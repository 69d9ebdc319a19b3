//! sessionguard core - client-side session handling for a remote identity service.
//!
//! This crate holds bearer credentials, keeps them fresh without disrupting
//! in-flight requests, protects outbound calls against refresh storms and rate
//! limits, and gates navigation on session state. It is shared by the CLI and
//! any UI front-end.

pub mod api;
pub mod auth;
pub mod config;
pub mod guard;
pub mod manager;
pub mod models;
pub mod scheduler;

pub use api::{ApiClient, ApiError, RefreshCoordinator, RefreshFailure, RequestSpec};
pub use auth::{
    CredentialStore, FileStorage, KeyringStorage, MemoryStorage, SessionSnapshot, SessionState,
    SessionStatus, TokenStorage,
};
pub use config::{Config, StorageKind};
pub use guard::{GuardConfig, NavigationDecision, NavigationGuard, Route, RouteTable};
pub use manager::SessionManager;
pub use models::User;
pub use scheduler::AutoRefresh;
