use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::{DeviceActivation, DeviceInfo, License, LicenseStatus};

use super::{ensure_verified, find_license_by_key};

pub const DEFAULT_DEACTIVATION_REASON: &str = "user_requested";

#[derive(Debug, Clone, Deserialize)]
pub struct ActivationRequest {
    pub license_key: String,
    pub device_fingerprint: String,
    #[serde(default)]
    pub device: DeviceInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    /// First activation of this fingerprint
    Created,
    /// A previously deactivated record was brought back
    Reactivated,
    /// Already active; only the session was recorded
    Existing,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationResult {
    pub status: ActivationStatus,
    pub device: DeviceActivation,
    pub active_devices: i64,
    pub max_devices: i64,
}

/// Which activation to deactivate: by record id, or by the key and raw
/// fingerprint the client knows.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum DeactivateTarget {
    #[serde(rename = "id")]
    ById { license_id: String, device_id: String },
    #[serde(rename = "fingerprint")]
    ByFingerprint {
        license_key: String,
        device_fingerprint: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct DeactivationResult {
    pub device_id: String,
    /// False when the device was already inactive
    pub deactivated: bool,
    pub active_devices: i64,
}

fn require_fingerprint(fingerprint: &str) -> Result<String> {
    if fingerprint.trim().is_empty() {
        return Err(AppError::InvalidRequest("Device fingerprint is required".into()));
    }
    Ok(crypto::hash_fingerprint(fingerprint))
}

/// Fails with CapacityExceeded when every slot is taken.
fn ensure_capacity(conn: &Connection, license: &License) -> Result<()> {
    let active = queries::count_active_devices(conn, &license.id)?;
    if active >= license.max_devices {
        return Err(AppError::CapacityExceeded(format!(
            "Device limit reached ({}/{}). Deactivate a device first.",
            active, license.max_devices
        )));
    }
    Ok(())
}

/// Bind a device to a license.
///
/// The count-then-insert runs under `BEGIN IMMEDIATE`, so concurrent
/// activations for the same license are serialized and can never push the
/// active count past `max_devices`.
pub fn activate(state: &AppState, request: ActivationRequest) -> Result<ActivationResult> {
    let fingerprint_hash = require_fingerprint(&request.device_fingerprint)?;
    let now = state.now();

    let mut conn = state.db.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let license = find_license_by_key(&tx, &request.license_key)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))?;
    ensure_verified(&license)?;

    let status = license.effective_status(now);
    if status != LicenseStatus::Active {
        return Err(AppError::InvalidState(format!(
            "Cannot activate a device on a {} license",
            status
        )));
    }

    let (status, device_id) =
        match queries::get_device_by_fingerprint(&tx, &license.id, &fingerprint_hash)? {
            Some(existing) if existing.is_active => {
                queries::touch_device_session(&tx, &existing.id, now)?;
                (ActivationStatus::Existing, existing.id)
            }
            Some(inactive) => {
                ensure_capacity(&tx, &license)?;
                queries::reactivate_device(&tx, &inactive.id, &request.device, now)?;
                (ActivationStatus::Reactivated, inactive.id)
            }
            None => {
                ensure_capacity(&tx, &license)?;
                let device = DeviceActivation {
                    id: queries::gen_id(),
                    license_id: license.id.clone(),
                    device_fingerprint_hash: fingerprint_hash,
                    device_name: request.device.name.clone(),
                    device_type: request.device.device_type,
                    is_active: true,
                    activated_at: now,
                    last_seen_at: now,
                    deactivated_at: None,
                    deactivation_reason: None,
                    session_count: 1,
                };
                queries::insert_device(&tx, &device)?;
                (ActivationStatus::Created, device.id)
            }
        };

    let device = queries::get_device_by_id(&tx, &device_id)?
        .ok_or_else(|| AppError::Internal("Activated device vanished".into()))?;
    let active_devices = queries::count_active_devices(&tx, &license.id)?;
    tx.commit()?;

    if status != ActivationStatus::Existing {
        tracing::info!(
            "Device {} {:?} on license {} ({}/{})",
            device.id,
            status,
            license.id,
            active_devices,
            license.max_devices
        );
    }

    Ok(ActivationResult {
        status,
        device,
        active_devices,
        max_devices: license.max_devices,
    })
}

/// Free a device slot. Deactivating an already inactive device succeeds
/// with `deactivated: false`.
pub fn deactivate(
    state: &AppState,
    target: DeactivateTarget,
    reason: Option<&str>,
) -> Result<DeactivationResult> {
    let reason = reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_DEACTIVATION_REASON);
    let now = state.now();

    let mut conn = state.db.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let device = match &target {
        DeactivateTarget::ById {
            license_id,
            device_id,
        } => queries::get_device_by_id(&tx, device_id)?
            .filter(|d| &d.license_id == license_id),
        DeactivateTarget::ByFingerprint {
            license_key,
            device_fingerprint,
        } => {
            let fingerprint_hash = require_fingerprint(device_fingerprint)?;
            match find_license_by_key(&tx, license_key)? {
                Some(license) => {
                    queries::get_device_by_fingerprint(&tx, &license.id, &fingerprint_hash)?
                }
                None => None,
            }
        }
    }
    .ok_or_else(|| AppError::NotFound("Device activation not found".into()))?;

    let deactivated = queries::deactivate_device(&tx, &device.id, reason, now)?;
    let active_devices = queries::count_active_devices(&tx, &device.license_id)?;
    tx.commit()?;

    if deactivated {
        tracing::info!(
            "Device {} deactivated on license {} ({})",
            device.id,
            device.license_id,
            reason
        );
    }

    Ok(DeactivationResult {
        device_id: device.id,
        deactivated,
        active_devices,
    })
}

/// Every activation record of a license, active or not, oldest first.
pub fn list_devices(state: &AppState, license_id: &str) -> Result<Vec<DeviceActivation>> {
    let conn = state.db.get()?;
    queries::get_license_by_id(&conn, license_id)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))?;
    queries::list_devices_for_license(&conn, license_id)
}
