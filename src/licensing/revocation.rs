use rusqlite::TransactionBehavior;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::LicenseStatus;

pub const REVOKED_DEVICE_REASON: &str = "license_revoked";

#[derive(Debug, Clone, Deserialize)]
pub struct RevokeRequest {
    pub reason: String,
    #[serde(default)]
    pub revoked_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevocationResult {
    pub license_id: String,
    pub already_revoked: bool,
    pub devices_deactivated: usize,
    pub revoked_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub license_id: String,
    pub status: LicenseStatus,
    /// False when the license was already in the target state
    pub changed: bool,
}

/// Permanently revoke a license and free every device slot it holds.
///
/// The status change and the device cascade commit together. Revoking an
/// already revoked license succeeds without touching it.
pub fn revoke(
    state: &AppState,
    license_id: &str,
    reason: &str,
    revoked_by: Option<&str>,
) -> Result<RevocationResult> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::InvalidRequest("Revocation reason is required".into()));
    }
    let now = state.now();

    let mut conn = state.db.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let license = queries::get_license_by_id(&tx, license_id)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))?;

    if !queries::revoke_license(&tx, &license.id, reason, revoked_by, now)? {
        return Ok(RevocationResult {
            license_id: license.id,
            already_revoked: true,
            devices_deactivated: 0,
            revoked_at: license.revoked_at,
        });
    }

    let devices_deactivated =
        queries::deactivate_all_devices(&tx, &license.id, REVOKED_DEVICE_REASON, now)?;
    tx.commit()?;

    tracing::info!(
        "Revoked license {} ({}), {} device(s) deactivated",
        license.id,
        reason,
        devices_deactivated
    );

    Ok(RevocationResult {
        license_id: license.id,
        already_revoked: false,
        devices_deactivated,
        revoked_at: Some(now),
    })
}

/// Temporarily block an active license. Devices stay bound.
pub fn suspend(state: &AppState, license_id: &str, reason: Option<&str>) -> Result<StatusChange> {
    let now = state.now();
    let mut conn = state.db.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let license = queries::get_license_by_id(&tx, license_id)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))?;

    let changed = match license.status {
        LicenseStatus::Suspended => false,
        LicenseStatus::Active => queries::suspend_license(&tx, &license.id, now)?,
        other => {
            return Err(AppError::InvalidState(format!(
                "Cannot suspend a {} license",
                other
            )));
        }
    };
    tx.commit()?;

    if changed {
        tracing::info!(
            "Suspended license {} ({})",
            license.id,
            reason.unwrap_or("no reason given")
        );
    }

    Ok(StatusChange {
        license_id: license.id,
        status: LicenseStatus::Suspended,
        changed,
    })
}

/// Lift a suspension. Only suspended licenses can be reinstated.
pub fn reinstate(state: &AppState, license_id: &str) -> Result<StatusChange> {
    let conn = state.db.get()?;

    let license = queries::get_license_by_id(&conn, license_id)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))?;

    if !queries::reinstate_license(&conn, &license.id)? {
        return Err(AppError::InvalidState(format!(
            "Cannot reinstate a {} license",
            license.status
        )));
    }

    tracing::info!("Reinstated license {}", license.id);

    Ok(StatusChange {
        license_id: license.id,
        status: LicenseStatus::Active,
        changed: true,
    })
}
