use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::auth::claims::{string_or_number, Claims};

/// The authenticated principal, as far as the UI is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    #[serde(deserialize_with = "required_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl User {
    /// Build a profile from unverified token claims.
    ///
    /// Used only when the server hands back no user object.
    pub fn from_claims(claims: &Claims) -> Option<Self> {
        let id = claims.sub.clone().or_else(|| claims.username.clone())?;
        Some(Self {
            username: claims.username.clone().unwrap_or_else(|| id.clone()),
            id,
            roles: claims.roles.iter().cloned().collect(),
            permissions: claims.permissions.iter().cloned().collect(),
            email: claims.email.clone(),
            display_name: None,
        })
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn has_all_roles(&self, roles: &BTreeSet<String>) -> bool {
        roles.is_subset(&self.roles)
    }

    pub fn has_all_permissions(&self, permissions: &BTreeSet<String>) -> bool {
        permissions.is_subset(&self.permissions)
    }

    /// Name for display, falling back to the username.
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

fn required_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    string_or_number(deserializer)?.ok_or_else(|| serde::de::Error::custom("user id is missing"))
}

/// Fields accepted by `PUT /users/me`. Unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_user() {
        let json = r#"{"id": 12, "username": "alice", "email": "alice@example.com", "first_name": "Alice", "display_name": "Alice A.", "roles": ["admin", "user"], "primary_role": "admin", "is_active": true}"#;
        let user: User = serde_json::from_str(json).expect("user should parse");
        assert_eq!(user.id, "12");
        assert!(user.has_role("admin"));
        assert!(!user.has_role("auditor"));
        assert!(user.permissions.is_empty());
        assert_eq!(user.display(), "Alice A.");
    }

    #[test]
    fn test_parse_user_without_id_fails() {
        assert!(serde_json::from_str::<User>(r#"{"username": "alice"}"#).is_err());
    }

    #[test]
    fn test_from_claims() {
        let claims = Claims {
            sub: Some("7".to_string()),
            username: Some("bob".to_string()),
            roles: vec!["user".to_string()],
            permissions: vec!["reports:read".to_string()],
            ..Default::default()
        };
        let user = User::from_claims(&claims).expect("claims carry an id");
        assert_eq!(user.id, "7");
        assert_eq!(user.username, "bob");
        assert!(user.has_permission("reports:read"));
        assert_eq!(user.display(), "bob");
    }

    #[test]
    fn test_from_claims_without_identity() {
        assert!(User::from_claims(&Claims::default()).is_none());
    }

    #[test]
    fn test_role_and_permission_subsets() {
        let claims = Claims {
            sub: Some("1".to_string()),
            roles: vec!["admin".to_string(), "user".to_string()],
            permissions: vec!["a".to_string()],
            ..Default::default()
        };
        let user = User::from_claims(&claims).expect("user");
        let wanted: BTreeSet<String> = ["admin".to_string()].into();
        assert!(user.has_all_roles(&wanted));
        assert!(user.has_all_roles(&BTreeSet::new()));
        let missing: BTreeSet<String> = ["b".to_string()].into();
        assert!(!user.has_all_permissions(&missing));
    }

    #[test]
    fn test_profile_update_skips_unset_fields() {
        let update = ProfileUpdate {
            display_name: Some("Al".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&update).expect("serialize");
        assert_eq!(json, serde_json::json!({"display_name": "Al"}));
    }
}
