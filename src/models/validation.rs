use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Result of classifying a presented license key.
/// Variants are listed in evaluation precedence; the first match wins.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidationOutcome {
    InvalidKey,
    InvalidSignature,
    Revoked,
    Suspended,
    Expired,
    DeviceLimitExceeded,
    Success,
}

impl ValidationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ValidationOutcome::Success)
    }
}

/// Append-only record of one validation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationLogEntry {
    pub id: String,
    pub license_id: Option<String>,
    pub license_key_hash: String,
    pub device_fingerprint_hash: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub result: ValidationOutcome,
    pub details: Option<serde_json::Value>,
    pub duration_ms: i64,
    pub created_at: i64,
}
