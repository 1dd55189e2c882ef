use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::{DeviceActivation, Entitlement, License, LicenseStatus};

use super::verified_claims;

/// Full administrative view of one license. The key hash and private
/// material are never part of it.
#[derive(Debug, Clone, Serialize)]
pub struct LicenseInfo {
    #[serde(flatten)]
    pub license: License,
    pub effective_status: LicenseStatus,
    /// False when the signature fails or a column drifted from the signed claims
    pub signature_valid: bool,
    pub active_devices: i64,
    pub entitlements: Vec<Entitlement>,
    pub devices: Vec<DeviceActivation>,
}

/// Every license issued to `email`, newest first.
pub fn find_licenses_by_email(state: &AppState, email: &str) -> Result<Vec<License>> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(AppError::InvalidRequest("email is required".into()));
    }
    let conn = state.db.get()?;
    queries::list_licenses_by_email(&conn, &email)
}

pub fn get_license_info(state: &AppState, license_id: &str) -> Result<LicenseInfo> {
    let now = state.now();
    let conn = state.db.get()?;

    let license = queries::get_license_by_id(&conn, license_id)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))?;
    let entitlements = queries::list_entitlements_for_license(&conn, &license.id)?;
    let devices = queries::list_devices_for_license(&conn, &license.id)?;
    let active_devices = devices.iter().filter(|d| d.is_active).count() as i64;

    Ok(LicenseInfo {
        effective_status: license.effective_status(now),
        signature_valid: verified_claims(&license).is_some(),
        license,
        active_devices,
        entitlements,
        devices,
    })
}
