use serde::{Deserialize, Serialize};

use super::{FeatureMap, LicenseType};

/// Plan template: defaults applied when a license is issued against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Generated at load time when a catalog file omits it
    #[serde(default)]
    pub id: String,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub license_type: Option<LicenseType>,
    #[serde(default)]
    pub features: FeatureMap,
    #[serde(default)]
    pub max_users: Option<i64>,
    #[serde(default)]
    pub max_devices: Option<i64>,
    #[serde(default)]
    pub max_api_calls_per_month: Option<i64>,
    /// Default validity for paid licenses
    #[serde(default)]
    pub valid_days: Option<i64>,
    /// Default validity for trial licenses
    #[serde(default)]
    pub trial_days: Option<i64>,
    #[serde(default)]
    pub created_at: i64,
}

impl Plan {
    /// Plan-provided validity for a license of `license_type`.
    /// Trials prefer `trial_days`; everything else uses `valid_days`.
    pub fn default_valid_days(&self, license_type: LicenseType) -> Option<i64> {
        match license_type {
            LicenseType::Trial => self.trial_days.or(self.valid_days),
            _ => self.valid_days,
        }
    }
}
