use rusqlite::TransactionBehavior;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::{Entitlement, LicenseStatus, UsageLogEntry};

use super::{
    ensure_verified, find_license_by_key, signed_entitlement, signed_entitlements, verified_claims,
};

/// Why a feature check was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FeatureDenial {
    /// Unknown key, or the license is revoked or suspended
    InvalidLicense,
    Expired,
    FeatureNotFound,
    FeatureDisabled,
    FeatureExpired,
    UsageLimitExceeded,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureCheckRequest {
    pub license_key: String,
    pub feature_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FeatureDenial>,
    pub feature_key: String,
    pub usage_current: Option<i64>,
    pub usage_limit: Option<i64>,
    /// None when unlimited
    pub remaining: Option<i64>,
}

impl FeatureDecision {
    fn denied(
        feature_key: &str,
        reason: FeatureDenial,
        entitlement: Option<&Entitlement>,
    ) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            feature_key: feature_key.to_string(),
            usage_current: entitlement.map(|e| e.usage_current),
            usage_limit: entitlement.and_then(|e| e.usage_limit),
            remaining: entitlement.and_then(Entitlement::remaining),
        }
    }
}

/// Read-only: decides whether `feature_key` may be used right now.
/// Never consumes usage.
pub fn check_feature(
    state: &AppState,
    license_key: &str,
    feature_key: &str,
) -> Result<FeatureDecision> {
    let now = state.now();
    let conn = state.db.get()?;

    let Some(license) = find_license_by_key(&conn, license_key)?
        .filter(|license| verified_claims(license).is_some())
    else {
        return Ok(FeatureDecision::denied(feature_key, FeatureDenial::InvalidLicense, None));
    };

    match license.effective_status(now) {
        LicenseStatus::Active => {}
        LicenseStatus::Expired => {
            return Ok(FeatureDecision::denied(feature_key, FeatureDenial::Expired, None));
        }
        LicenseStatus::Revoked | LicenseStatus::Suspended => {
            return Ok(FeatureDecision::denied(feature_key, FeatureDenial::InvalidLicense, None));
        }
    }

    let Some(entitlement) = queries::get_entitlement(&conn, &license.id, feature_key)?
        .and_then(|e| signed_entitlement(&license, e))
    else {
        return Ok(FeatureDecision::denied(feature_key, FeatureDenial::FeatureNotFound, None));
    };

    let denial = if !entitlement.is_enabled {
        Some(FeatureDenial::FeatureDisabled)
    } else if entitlement.valid_until.is_some_and(|until| until < now) {
        Some(FeatureDenial::FeatureExpired)
    } else if entitlement.is_exhausted() {
        Some(FeatureDenial::UsageLimitExceeded)
    } else {
        None
    };

    if let Some(reason) = denial {
        return Ok(FeatureDecision::denied(feature_key, reason, Some(&entitlement)));
    }

    Ok(FeatureDecision {
        allowed: true,
        reason: None,
        feature_key: feature_key.to_string(),
        usage_current: Some(entitlement.usage_current),
        usage_limit: entitlement.usage_limit,
        remaining: entitlement.remaining(),
    })
}

fn default_action() -> String {
    "use".to_string()
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageRecord {
    pub license_key: String,
    pub feature_key: String,
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Idempotency key; a repeated id for the same license is not counted twice
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageReceipt {
    /// False when `request_id` was already recorded
    pub recorded: bool,
    pub feature_key: String,
    pub quantity: i64,
    pub usage_current: i64,
    pub usage_limit: Option<i64>,
    pub remaining: Option<i64>,
}

/// Append a usage record and bump the entitlement counter.
///
/// This is an accounting primitive: it does not enforce the limit, and
/// callers that want enforcement call [`check_feature`] first. The log row
/// and the counter increment commit together, and a repeated `request_id`
/// leaves both untouched.
pub fn log_usage(state: &AppState, record: UsageRecord) -> Result<UsageReceipt> {
    if record.quantity <= 0 {
        return Err(AppError::InvalidRequest(format!(
            "quantity must be positive (got {})",
            record.quantity
        )));
    }
    let request_id = record
        .request_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from);
    let now = state.now();

    let mut conn = state.db.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let license = find_license_by_key(&tx, &record.license_key)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))?;
    ensure_verified(&license)?;
    let entitlement = queries::get_entitlement(&tx, &license.id, &record.feature_key)?
        .and_then(|e| signed_entitlement(&license, e))
        .ok_or_else(|| {
            AppError::NotFound(format!("No entitlement for feature {}", record.feature_key))
        })?;

    let entry = UsageLogEntry {
        id: queries::gen_id(),
        license_id: license.id.clone(),
        entitlement_id: entitlement.id.clone(),
        feature_key: record.feature_key.clone(),
        action: record.action,
        quantity: record.quantity,
        metadata: record.metadata,
        request_id,
        created_at: now,
    };

    let recorded = queries::try_insert_usage_log(&tx, &entry)?;
    let usage_current = if recorded {
        queries::increment_entitlement_usage(&tx, &entitlement.id, record.quantity, now)?
    } else {
        tracing::debug!(
            "Duplicate usage request {:?} for license {}, not counted",
            entry.request_id,
            license.id
        );
        entitlement.usage_current
    };
    tx.commit()?;

    let remaining = entitlement
        .usage_limit
        .map(|limit| (limit - usage_current).max(0));

    Ok(UsageReceipt {
        recorded,
        feature_key: record.feature_key,
        quantity: record.quantity,
        usage_current,
        usage_limit: entitlement.usage_limit,
        remaining,
    })
}

/// All entitlements of the license a key resolves to, with enabled flags
/// and limits taken from the signed feature map.
pub fn get_entitlements(state: &AppState, license_key: &str) -> Result<Vec<Entitlement>> {
    let conn = state.db.get()?;
    let license = find_license_by_key(&conn, license_key)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))?;
    ensure_verified(&license)?;
    let entitlements = queries::list_entitlements_for_license(&conn, &license.id)?;
    Ok(signed_entitlements(&license, entitlements))
}
