use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Suspended,
    Revoked,
    Expired,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    AsRefStr,
    EnumString,
    Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseType {
    #[default]
    Standard,
    Trial,
    Subscription,
    Enterprise,
}

/// A single feature grant: an on/off toggle or a numeric usage limit.
///
/// A limit of zero or less means "enabled, unlimited".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureGrant {
    Toggle(bool),
    Limit(i64),
}

impl FeatureGrant {
    pub fn is_enabled(&self) -> bool {
        match self {
            FeatureGrant::Toggle(enabled) => *enabled,
            FeatureGrant::Limit(_) => true,
        }
    }

    pub fn usage_limit(&self) -> Option<i64> {
        match self {
            FeatureGrant::Limit(limit) if *limit > 0 => Some(*limit),
            _ => None,
        }
    }
}

/// Feature key -> grant. Ordered so the signed serialization is canonical.
pub type FeatureMap = BTreeMap<String, FeatureGrant>;

/// The claim set that is actually signed.
///
/// Field order is fixed by the struct and `features` is a `BTreeMap`, so
/// `serde_json::to_vec` yields the same bytes for the same claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseClaims {
    pub iss: String,
    /// Licensee email
    pub sub: String,
    pub plan: Option<String>,
    pub license_type: LicenseType,
    pub features: FeatureMap,
    pub max_users: i64,
    pub max_devices: i64,
    pub max_api_calls_per_month: Option<i64>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    #[serde(skip_serializing)]
    pub license_key_hash: String,
    pub licensee_email: String,
    pub issuer: String,
    /// Operator principal that issued the license
    pub issued_by: Option<String>,
    pub plan_id: Option<String>,
    pub plan_code: Option<String>,
    pub license_type: LicenseType,
    pub features: FeatureMap,
    pub max_users: i64,
    pub max_devices: i64,
    pub max_api_calls_per_month: Option<i64>,
    pub jti: String,
    /// Canonical JSON of [`LicenseClaims`], exactly as signed
    pub signed_data: String,
    /// Base64 Ed25519 signature over `signed_data`
    pub signature: String,
    /// Base64 Ed25519 verifying key, unique to this license
    pub public_key: String,
    pub status: LicenseStatus,
    pub revocation_reason: Option<String>,
    pub revoked_at: Option<i64>,
    pub revoked_by: Option<String>,
    pub suspended_at: Option<i64>,
    pub issued_at: i64,
    pub expires_at: Option<i64>,
    pub last_validated_at: Option<i64>,
    pub last_heartbeat_at: Option<i64>,
    pub created_at: i64,
}

impl License {
    /// Expiry is always evaluated live; a stored `active` status is not trusted on its own.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.status == LicenseStatus::Expired || self.expires_at.is_some_and(|exp| exp < now)
    }

    /// Status as seen at `now`, with revocation taking precedence over suspension,
    /// and suspension over expiry.
    pub fn effective_status(&self, now: i64) -> LicenseStatus {
        match self.status {
            LicenseStatus::Revoked => LicenseStatus::Revoked,
            LicenseStatus::Suspended => LicenseStatus::Suspended,
            _ if self.is_expired_at(now) => LicenseStatus::Expired,
            _ => LicenseStatus::Active,
        }
    }

    /// True when every column duplicated from the signed claims still
    /// carries the signed value.
    pub fn matches_claims(&self, claims: &LicenseClaims) -> bool {
        self.issuer == claims.iss
            && self.licensee_email == claims.sub
            && self.plan_code == claims.plan
            && self.license_type == claims.license_type
            && self.features == claims.features
            && self.max_users == claims.max_users
            && self.max_devices == claims.max_devices
            && self.max_api_calls_per_month == claims.max_api_calls_per_month
            && self.issued_at == claims.iat
            && self.expires_at == Some(claims.exp)
            && self.jti == claims.jti
    }
}

/// Input for issuing a license. Everything but `email` is optional;
/// explicit values win over plan defaults, which win over built-in fallbacks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueRequest {
    #[serde(default)]
    pub email: Option<String>,
    /// Plan id or plan code
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub license_type: Option<LicenseType>,
    #[serde(default)]
    pub max_users: Option<i64>,
    #[serde(default)]
    pub max_devices: Option<i64>,
    #[serde(default)]
    pub max_api_calls_per_month: Option<i64>,
    #[serde(default)]
    pub valid_days: Option<i64>,
    #[serde(default)]
    pub features: Option<FeatureMap>,
    #[serde(default)]
    pub issued_by: Option<String>,
}

/// Response for a freshly issued license.
/// `license_key` is the only time the plaintext key ever leaves the system.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedLicense {
    pub license_id: String,
    pub license_key: String,
    pub public_key: String,
    /// Signed claims and signature, for offline verification with `public_key`
    pub signed_data: String,
    pub signature: String,
    pub status: LicenseStatus,
    pub license_type: LicenseType,
    pub plan_code: Option<String>,
    pub max_devices: i64,
    pub issued_at: i64,
    pub expires_at: i64,
    pub entitlement_count: usize,
}
