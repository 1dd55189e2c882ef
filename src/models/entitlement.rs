use serde::{Deserialize, Serialize};

use super::FeatureGrant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: String,
    pub license_id: String,
    pub feature_key: String,
    pub feature_name: String,
    pub is_enabled: bool,
    /// None = unlimited
    pub usage_limit: Option<i64>,
    /// Only ever increases, via usage metering
    pub usage_current: i64,
    pub valid_until: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Entitlement {
    /// Build the entitlement row for one feature-map entry at issuance.
    pub fn from_grant(
        id: String,
        license_id: &str,
        feature_key: &str,
        grant: FeatureGrant,
        now: i64,
    ) -> Self {
        Self {
            id,
            license_id: license_id.to_string(),
            feature_key: feature_key.to_string(),
            feature_name: humanize_feature_key(feature_key),
            is_enabled: grant.is_enabled(),
            usage_limit: grant.usage_limit(),
            usage_current: 0,
            valid_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Units left before the limit, or None when unlimited.
    pub fn remaining(&self) -> Option<i64> {
        self.usage_limit
            .map(|limit| (limit - self.usage_current).max(0))
    }

    pub fn is_exhausted(&self) -> bool {
        self.usage_limit
            .is_some_and(|limit| self.usage_current >= limit)
    }
}

/// `reports_per_month` -> `Reports Per Month`
pub fn humanize_feature_key(key: &str) -> String {
    key.split(['_', '-', '.'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub id: String,
    pub license_id: String,
    pub entitlement_id: String,
    pub feature_key: String,
    pub action: String,
    pub quantity: i64,
    pub metadata: Option<serde_json::Value>,
    /// Client-supplied idempotency key
    pub request_id: Option<String>,
    pub created_at: i64,
}
