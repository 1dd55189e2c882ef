use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Laptop,
    Mobile,
    Server,
    Browser,
    #[default]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceActivation {
    pub id: String,
    pub license_id: String,
    /// One-way hash; the raw fingerprint is never stored
    pub device_fingerprint_hash: String,
    pub device_name: Option<String>,
    pub device_type: DeviceType,
    pub is_active: bool,
    pub activated_at: i64,
    pub last_seen_at: i64,
    pub deactivated_at: Option<i64>,
    pub deactivation_reason: Option<String>,
    pub session_count: i64,
}

/// Descriptive details supplied by the client at activation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub device_type: DeviceType,
}
