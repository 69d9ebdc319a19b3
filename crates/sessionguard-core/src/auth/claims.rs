//! Bearer token claim decoding.
//!
//! Decoding is advisory only: the signature is never checked, so claims are
//! used to schedule proactive refreshes and to fill in profile fields, never
//! to grant access.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Refresh ahead of expiry when less than this much lifetime remains.
pub const DEFAULT_EXPIRY_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Claims {
    #[serde(default, deserialize_with = "string_or_number")]
    pub sub: Option<String>,
    #[serde(default, alias = "preferred_username")]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Expiry, seconds since the epoch
    #[serde(default)]
    pub exp: Option<f64>,
    #[serde(default)]
    pub iat: Option<f64>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, alias = "scope", deserialize_with = "scopes")]
    pub scopes: Vec<String>,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let exp = self.exp.filter(|e| e.is_finite())?;
        DateTime::from_timestamp_millis((exp * 1000.0) as i64)
    }
}

/// Decode the payload of a three-segment bearer token.
///
/// Returns `None` for anything malformed.
pub fn decode(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };
    if header.is_empty() || payload.is_empty() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Time until the token's `exp`, floored at zero.
///
/// Tokens without a decodable expiry report zero.
pub fn remaining_time(token: &str) -> Duration {
    remaining_time_at(token, Utc::now())
}

fn remaining_time_at(token: &str, now: DateTime<Utc>) -> Duration {
    let Some(exp) = decode(token).and_then(|c| c.exp) else {
        return Duration::ZERO;
    };
    let remaining_ms = exp * 1000.0 - now.timestamp_millis() as f64;
    if remaining_ms.is_finite() && remaining_ms > 0.0 {
        Duration::from_millis(remaining_ms as u64)
    } else {
        Duration::ZERO
    }
}

/// Whether fewer than `window` of lifetime remain.
///
/// A token without a decodable `exp` is never considered expiring soon.
pub fn is_expiring_soon(token: &str, window: Duration) -> bool {
    is_expiring_soon_at(token, window, Utc::now())
}

fn is_expiring_soon_at(token: &str, window: Duration, now: DateTime<Utc>) -> bool {
    match decode(token).and_then(|c| c.exp) {
        Some(_) => remaining_time_at(token, now) < window,
        None => false,
    }
}

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// OAuth-style `scope` is a space separated string; some issuers send a list.
fn scopes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    })
}
