use std::time::Instant;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::crypto;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::{
    Entitlement, FeatureMap, License, LicenseStatus, LicenseType, ValidationLogEntry,
    ValidationOutcome,
};
use crate::util::RequestContext;

use super::{find_license_by_key, signed_entitlements, verified_claims};

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateRequest {
    pub license_key: String,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
}

/// License fields a client needs after a successful validation.
#[derive(Debug, Clone, Serialize)]
pub struct LicenseSummary {
    pub id: String,
    pub licensee_email: String,
    pub plan_code: Option<String>,
    pub license_type: LicenseType,
    pub status: LicenseStatus,
    pub max_users: i64,
    pub max_devices: i64,
    pub max_api_calls_per_month: Option<i64>,
    pub active_devices: i64,
    pub issued_at: i64,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResponse {
    pub valid: bool,
    pub outcome: ValidationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<LicenseSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlements: Option<Vec<Entitlement>>,
}

struct Classification {
    outcome: ValidationOutcome,
    reason: Option<String>,
    details: serde_json::Value,
    license: Option<License>,
    active_devices: i64,
}

impl Classification {
    fn rejected(
        outcome: ValidationOutcome,
        reason: String,
        details: serde_json::Value,
        license: License,
    ) -> Self {
        Self {
            outcome,
            reason: Some(reason),
            details,
            license: Some(license),
            active_devices: 0,
        }
    }
}

/// Checks run in a fixed order and the first failure wins: unknown key,
/// bad signature, revoked, suspended, expired, then device binding.
fn classify(
    conn: &Connection,
    key_hash: &str,
    fingerprint_hash: Option<&str>,
    now: i64,
) -> Result<Classification> {
    let Some(license) = queries::get_license_by_key_hash(conn, key_hash)? else {
        return Ok(Classification {
            outcome: ValidationOutcome::InvalidKey,
            reason: Some("License key not recognized".into()),
            details: json!({}),
            license: None,
            active_devices: 0,
        });
    };

    // Past this point expiry, limits and features in the row equal the signed ones
    if verified_claims(&license).is_none() {
        let details = json!({ "license_id": license.id });
        return Ok(Classification::rejected(
            ValidationOutcome::InvalidSignature,
            "License signature verification failed".into(),
            details,
            license,
        ));
    }

    match license.effective_status(now) {
        LicenseStatus::Revoked => {
            let reason = license
                .revocation_reason
                .clone()
                .unwrap_or_else(|| "License revoked".into());
            let details = json!({ "revoked_at": license.revoked_at, "reason": reason });
            return Ok(Classification::rejected(
                ValidationOutcome::Revoked,
                reason,
                details,
                license,
            ));
        }
        LicenseStatus::Suspended => {
            let details = json!({ "suspended_at": license.suspended_at });
            return Ok(Classification::rejected(
                ValidationOutcome::Suspended,
                "License suspended".into(),
                details,
                license,
            ));
        }
        LicenseStatus::Expired => {
            let details = json!({ "expires_at": license.expires_at });
            return Ok(Classification::rejected(
                ValidationOutcome::Expired,
                "License expired".into(),
                details,
                license,
            ));
        }
        LicenseStatus::Active => {}
    }

    let active_devices = queries::count_active_devices(conn, &license.id)?;

    // A device already bound to the license always passes; an unknown one
    // only passes while a slot is free. Validation never binds it.
    if let Some(fingerprint_hash) = fingerprint_hash {
        let bound = queries::get_device_by_fingerprint(conn, &license.id, fingerprint_hash)?
            .filter(|d| d.is_active);
        match bound {
            Some(device) => queries::update_device_last_seen(conn, &device.id, now)?,
            None if active_devices >= license.max_devices => {
                let details = json!({
                    "active_devices": active_devices,
                    "max_devices": license.max_devices,
                });
                let reason = format!(
                    "Device limit reached ({}/{})",
                    active_devices, license.max_devices
                );
                let mut rejected = Classification::rejected(
                    ValidationOutcome::DeviceLimitExceeded,
                    reason,
                    details,
                    license,
                );
                rejected.active_devices = active_devices;
                return Ok(rejected);
            }
            None => {}
        }
    }

    Ok(Classification {
        outcome: ValidationOutcome::Success,
        reason: None,
        details: json!({ "active_devices": active_devices }),
        license: Some(license),
        active_devices,
    })
}

/// Classify a presented key and return the license state.
///
/// Invalid keys are reported through `outcome`, never as an error; only
/// infrastructure failures return `Err`. Every classified attempt is
/// written to the audit store.
pub fn validate(
    state: &AppState,
    request: &ValidateRequest,
    context: &RequestContext,
) -> Result<ValidationResponse> {
    let started = Instant::now();
    let now = state.now();
    let key_hash = crypto::hash_license_key(&request.license_key);
    let fingerprint_hash = request
        .device_fingerprint
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .map(crypto::hash_fingerprint);

    let conn = state.db.get()?;
    let classification = classify(&conn, &key_hash, fingerprint_hash.as_deref(), now)?;

    let mut response = ValidationResponse {
        valid: classification.outcome.is_success(),
        outcome: classification.outcome,
        reason: classification.reason.clone(),
        license: None,
        features: None,
        entitlements: None,
    };

    if let Some(license) = &classification.license
        && classification.outcome.is_success()
    {
        queries::update_license_validated(&conn, &license.id, now)?;
        let entitlements = queries::list_entitlements_for_license(&conn, &license.id)?;
        response.entitlements = Some(signed_entitlements(license, entitlements));
        response.features = Some(license.features.clone());
        response.license = Some(LicenseSummary {
            id: license.id.clone(),
            licensee_email: license.licensee_email.clone(),
            plan_code: license.plan_code.clone(),
            license_type: license.license_type,
            status: LicenseStatus::Active,
            max_users: license.max_users,
            max_devices: license.max_devices,
            max_api_calls_per_month: license.max_api_calls_per_month,
            active_devices: classification.active_devices,
            issued_at: license.issued_at,
            expires_at: license.expires_at,
        });
    }
    drop(conn);

    let entry = ValidationLogEntry {
        id: queries::gen_id(),
        license_id: classification.license.as_ref().map(|l| l.id.clone()),
        license_key_hash: key_hash,
        device_fingerprint_hash: fingerprint_hash,
        ip_address: context.ip_address.clone(),
        user_agent: context.user_agent.clone(),
        result: classification.outcome,
        details: Some(classification.details),
        duration_ms: started.elapsed().as_millis() as i64,
        created_at: now,
    };
    let audit_conn = state.audit.get()?;
    queries::create_validation_log(&audit_conn, &entry)?;

    if !response.valid {
        tracing::warn!(
            "Validation rejected ({}) for license {}",
            response.outcome,
            entry.license_id.as_deref().unwrap_or("unknown")
        );
    }

    Ok(response)
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatRequest {
    pub license_key: String,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatResponse {
    /// True while the license is usable
    pub alive: bool,
    pub status: LicenseStatus,
    pub expires_at: Option<i64>,
    /// Whether the presented fingerprint matched an active device
    pub device_seen: bool,
    pub server_time: i64,
}

/// Liveness ping for a running client. Skips audit logging; a license whose
/// columns no longer match its signature is never reported alive.
pub fn heartbeat(state: &AppState, request: &HeartbeatRequest) -> Result<HeartbeatResponse> {
    let now = state.now();
    let conn = state.db.get()?;

    let license = find_license_by_key(&conn, &request.license_key)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))?;

    let status = license.effective_status(now);
    let verified = verified_claims(&license).is_some();
    queries::update_license_heartbeat(&conn, &license.id, now)?;

    let mut device_seen = false;
    if let Some(fingerprint) = request
        .device_fingerprint
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        && let Some(device) = queries::get_device_by_fingerprint(
            &conn,
            &license.id,
            &crypto::hash_fingerprint(fingerprint),
        )?
        && device.is_active
    {
        queries::update_device_last_seen(&conn, &device.id, now)?;
        device_seen = true;
    }

    Ok(HeartbeatResponse {
        alive: verified && status == LicenseStatus::Active,
        status,
        expires_at: license.expires_at,
        device_seen,
        server_time: now,
    })
}
