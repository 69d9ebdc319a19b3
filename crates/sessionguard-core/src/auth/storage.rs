//! Persistence backends for the credential store.
//!
//! Every backend keeps the same three keyed values: the access token, the
//! refresh token and the absolute expiry. Backends report failures through
//! `anyhow`; the `CredentialStore` decides what to do with them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use keyring::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{Config, StorageKind, APP_NAME};

/// Token file name in cache directory
const TOKEN_FILE: &str = "tokens.json";

const ACCESS_TOKEN_KEY: &str = "access_token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";
const EXPIRES_AT_KEY: &str = "expires_at";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Durable key-value medium for the token triple.
pub trait TokenStorage: Send + Sync {
    fn load(&self) -> Result<PersistedTokens>;
    fn save(&self, tokens: &PersistedTokens) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Build the storage backend selected in the config.
pub fn from_config(config: &Config) -> Result<Arc<dyn TokenStorage>> {
    let storage: Arc<dyn TokenStorage> = match config.storage {
        StorageKind::File => Arc::new(FileStorage::new(config.cache_dir()?.join(TOKEN_FILE))),
        StorageKind::Keyring => Arc::new(KeyringStorage::new(APP_NAME)),
        StorageKind::Memory => Arc::new(MemoryStorage::default()),
    };
    Ok(storage)
}

// ============================================================================
// File
// ============================================================================

/// Tokens in a JSON file, replaced atomically on every save.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStorage for FileStorage {
    fn load(&self) -> Result<PersistedTokens> {
        if !self.path.exists() {
            return Ok(PersistedTokens::default());
        }
        let contents = std::fs::read_to_string(&self.path).context("Failed to read token file")?;
        serde_json::from_str(&contents).context("Failed to parse token file")
    }

    fn save(&self, tokens: &PersistedTokens) -> Result<()> {
        // Unique temp name so concurrent saves never share a half-written file.
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create token directory")?;
        }
        let json = serde_json::to_string_pretty(tokens)?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, json).context("Failed to write token file")?;
        std::fs::rename(&tmp_path, &self.path).context("Failed to replace token file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove token file")?;
        }
        Ok(())
    }
}

// ============================================================================
// Keyring
// ============================================================================

/// Tokens in the OS keychain, one entry per key.
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read token from keychain"),
        }
    }

    fn write(&self, key: &str, value: Option<&str>) -> Result<()> {
        let entry = self.entry(key)?;
        match value {
            Some(value) => entry
                .set_password(value)
                .context("Failed to store token in keychain"),
            None => match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(e).context("Failed to delete token from keychain"),
            },
        }
    }
}

impl TokenStorage for KeyringStorage {
    fn load(&self) -> Result<PersistedTokens> {
        let expires_at = match self.read(EXPIRES_AT_KEY)? {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .ok(),
            None => None,
        };
        Ok(PersistedTokens {
            access_token: self.read(ACCESS_TOKEN_KEY)?,
            refresh_token: self.read(REFRESH_TOKEN_KEY)?,
            expires_at,
        })
    }

    fn save(&self, tokens: &PersistedTokens) -> Result<()> {
        self.write(ACCESS_TOKEN_KEY, tokens.access_token.as_deref())?;
        self.write(REFRESH_TOKEN_KEY, tokens.refresh_token.as_deref())?;
        let expires_at = tokens.expires_at.map(|dt| dt.to_rfc3339());
        self.write(EXPIRES_AT_KEY, expires_at.as_deref())
    }

    fn clear(&self) -> Result<()> {
        self.write(ACCESS_TOKEN_KEY, None)?;
        self.write(REFRESH_TOKEN_KEY, None)?;
        self.write(EXPIRES_AT_KEY, None)
    }
}

// ============================================================================
// Memory
// ============================================================================

#[derive(Default)]
pub struct MemoryStorage {
    tokens: Mutex<PersistedTokens>,
}

impl MemoryStorage {
    pub fn with_tokens(tokens: PersistedTokens) -> Self {
        Self {
            tokens: Mutex::new(tokens),
        }
    }

    pub fn snapshot(&self) -> PersistedTokens {
        self.tokens.lock().clone()
    }
}

impl TokenStorage for MemoryStorage {
    fn load(&self) -> Result<PersistedTokens> {
        Ok(self.snapshot())
    }

    fn save(&self, tokens: &PersistedTokens) -> Result<()> {
        *self.tokens.lock() = tokens.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.tokens.lock() = PersistedTokens::default();
        Ok(())
    }
}
