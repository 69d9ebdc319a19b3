use serde::{Deserialize, Serialize};

/// Policy decision outcome. The decision itself is made server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    #[serde(alias = "allow", alias = "PERMIT", alias = "ALLOW")]
    Permit,
    #[serde(alias = "DENY")]
    Deny,
    #[serde(alias = "INDETERMINATE")]
    Indeterminate,
    #[serde(alias = "NOT_APPLICABLE")]
    NotApplicable,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationRequest {
    pub resource: String,
    pub action: String,
    pub context: serde_json::Value,
}

impl AuthorizationRequest {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            context: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub effect: Effect,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub obligations: Vec<serde_json::Value>,
    #[serde(default)]
    pub advice: Vec<String>,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub evaluation_time_ms: f64,
}

impl Decision {
    pub fn is_permitted(&self) -> bool {
        self.effect == Effect::Permit
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    pub decision: Decision,
    #[serde(default)]
    pub request_id: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkAuthorizationRequest {
    pub requests: Vec<AuthorizationRequest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkSummary {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub permitted: usize,
    #[serde(default)]
    pub denied: usize,
    #[serde(default)]
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkAuthorizationResponse {
    #[serde(default)]
    pub results: Vec<AuthorizationResponse>,
    #[serde(default)]
    pub summary: BulkSummary,
}
