//! Authentication module for holding and describing the user session.
//!
//! This module provides:
//! - `CredentialStore`: the access/refresh token pair with its expiry
//! - `TokenStorage`: file, keychain and in-memory persistence backends
//! - `claims`: unverified bearer token decoding for expiry scheduling
//! - `SessionState`: the shared session aggregate and its status channel

pub mod claims;
pub mod session;
pub mod storage;
pub mod store;

pub use claims::{Claims, DEFAULT_EXPIRY_WINDOW};
pub use session::{SessionSnapshot, SessionState, SessionStatus};
pub use storage::{FileStorage, KeyringStorage, MemoryStorage, PersistedTokens, TokenStorage};
pub use store::{CredentialStore, TokenSet};
