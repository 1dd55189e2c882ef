//! License lifecycle operations.
//!
//! Every operation takes the shared [`AppState`](crate::db::AppState), opens
//! its own pooled connection, and keeps multi-row mutations inside a single
//! `BEGIN IMMEDIATE` transaction so capacity checks and their writes are
//! serialized against concurrent requests.

mod devices;
mod info;
mod issuer;
mod metering;
mod revocation;
mod validator;

pub use devices::*;
pub use info::*;
pub use issuer::*;
pub use metering::*;
pub use revocation::*;
pub use validator::*;

use rusqlite::Connection;

use crate::crypto;
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{Entitlement, License, LicenseClaims};

/// Resolve a presented plaintext key through its lookup hash.
fn find_license_by_key(conn: &Connection, license_key: &str) -> Result<Option<License>> {
    queries::get_license_by_key_hash(conn, &crypto::hash_license_key(license_key))
}

/// The claim set, if the signature holds and no duplicated column has
/// drifted from it. Limits, expiry and features are only trusted through this.
fn verified_claims(license: &License) -> Option<LicenseClaims> {
    crypto::verify_claims(&license.signed_data, &license.signature, &license.public_key)
        .filter(|claims| license.matches_claims(claims))
}

fn ensure_verified(license: &License) -> Result<()> {
    if verified_claims(license).is_none() {
        tracing::warn!("License {} failed signature verification", license.id);
        return Err(AppError::InvalidState(
            "License signature verification failed".into(),
        ));
    }
    Ok(())
}

/// Re-derive the enabled flag and limit of an entitlement row from the
/// license's signed feature map. None when the feature was never granted.
/// `license` must already be verified.
fn signed_entitlement(license: &License, mut entitlement: Entitlement) -> Option<Entitlement> {
    let grant = license.features.get(&entitlement.feature_key)?;
    entitlement.is_enabled = grant.is_enabled();
    entitlement.usage_limit = grant.usage_limit();
    Some(entitlement)
}

fn signed_entitlements(license: &License, entitlements: Vec<Entitlement>) -> Vec<Entitlement> {
    entitlements
        .into_iter()
        .filter_map(|e| signed_entitlement(license, e))
        .collect()
}
