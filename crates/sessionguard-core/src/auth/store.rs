use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::storage::{MemoryStorage, PersistedTokens, TokenStorage};

/// The credential triple. Always read and replaced as one value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    /// Unknown expiry counts as not expired until a 401 says otherwise.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Utc::now() >= at).unwrap_or(false)
    }

    fn to_persisted(&self) -> PersistedTokens {
        PersistedTokens {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
        }
    }
}

impl From<PersistedTokens> for TokenSet {
    fn from(p: PersistedTokens) -> Self {
        Self {
            access_token: p.access_token.filter(|t| !t.is_empty()),
            refresh_token: p.refresh_token.filter(|t| !t.is_empty()),
            expires_at: p.expires_at,
        }
    }
}

/// Holder of the bearer credentials.
///
/// All operations are synchronous. Persistence problems are logged and
/// swallowed: losing the persisted copy only means the user logs in again.
pub struct CredentialStore {
    tokens: RwLock<TokenSet>,
    storage: Arc<dyn TokenStorage>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        Self {
            tokens: RwLock::new(TokenSet::default()),
            storage,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::default()))
    }

    /// Load persisted credentials. Returns whether an access token was found.
    pub fn restore(&self) -> bool {
        let loaded = match self.storage.load() {
            Ok(persisted) => TokenSet::from(persisted),
            Err(e) => {
                warn!(error = %e, "Failed to load persisted tokens");
                TokenSet::default()
            }
        };
        let has_access = loaded.access_token.is_some();
        debug!(
            has_access,
            has_refresh = loaded.refresh_token.is_some(),
            "Restored persisted tokens"
        );
        *self.tokens.write() = loaded;
        has_access
    }

    /// Replace the whole credential set. `expires_in` of `None` leaves expiry unknown.
    pub fn set(&self, access: String, refresh: Option<String>, expires_in: Option<Duration>) {
        let next = TokenSet {
            access_token: Some(access),
            refresh_token: refresh.filter(|t| !t.is_empty()),
            expires_at: expires_in.and_then(expiry_from_now),
        };
        let mut tokens = self.tokens.write();
        self.persist(&next);
        *tokens = next;
    }

    /// Install a refreshed access token, keeping the current refresh token
    /// unless a rotated one is supplied.
    ///
    /// Only applies while the stored refresh token is still `expected_refresh`;
    /// a logout or a new login in the meantime wins. Returns whether the
    /// update was applied.
    pub fn update_access(
        &self,
        expected_refresh: &str,
        access: String,
        rotated_refresh: Option<String>,
        expires_in: Option<Duration>,
    ) -> bool {
        let mut tokens = self.tokens.write();
        if tokens.refresh_token.as_deref() != Some(expected_refresh) {
            debug!("Discarding refreshed token: credentials changed during refresh");
            return false;
        }
        let next = TokenSet {
            access_token: Some(access),
            refresh_token: rotated_refresh
                .filter(|t| !t.is_empty())
                .or_else(|| tokens.refresh_token.clone()),
            expires_at: expires_in.and_then(expiry_from_now),
        };
        self.persist(&next);
        *tokens = next;
        true
    }

    pub fn get(&self) -> TokenSet {
        self.tokens.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.tokens.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.tokens.read().refresh_token.clone()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.tokens.read().expires_at
    }

    pub fn has_access(&self) -> bool {
        self.tokens.read().access_token.is_some()
    }

    pub fn has_refresh(&self) -> bool {
        self.tokens.read().refresh_token.is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.tokens.read().is_expired()
    }

    /// Drop all credentials, in memory and on the persistence medium.
    pub fn clear(&self) {
        let mut tokens = self.tokens.write();
        *tokens = TokenSet::default();
        if let Err(e) = self.storage.clear() {
            warn!(error = %e, "Failed to clear persisted tokens");
        }
    }

    fn persist(&self, tokens: &TokenSet) {
        if let Err(e) = self.storage.save(&tokens.to_persisted()) {
            warn!(error = %e, "Failed to persist tokens");
        }
    }
}

fn expiry_from_now(expires_in: Duration) -> Option<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(expires_in).ok()?;
    Utc::now().checked_add_signed(delta)
}
