use rusqlite::TransactionBehavior;

use crate::clock::SECONDS_PER_DAY;
use crate::crypto;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::{
    Entitlement, FeatureMap, IssueRequest, IssuedLicense, License, LicenseClaims, LicenseStatus,
    LicenseType, Plan,
};

pub const DEFAULT_VALID_DAYS: i64 = 365;
pub const DEFAULT_MAX_USERS: i64 = 1;
pub const DEFAULT_MAX_DEVICES: i64 = 3;

/// Limits and features after merging request overrides over plan defaults
/// over built-in fallbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct LicenseTerms {
    pub license_type: LicenseType,
    pub max_users: i64,
    pub max_devices: i64,
    pub max_api_calls_per_month: Option<i64>,
    pub valid_days: i64,
    pub features: FeatureMap,
}

impl LicenseTerms {
    pub fn resolve(request: &IssueRequest, plan: Option<&Plan>) -> Self {
        let positive = |v: Option<i64>| v.filter(|n| *n > 0);

        let license_type = request
            .license_type
            .or(plan.and_then(|p| p.license_type))
            .unwrap_or_default();

        let max_users = request
            .max_users
            .or(positive(plan.and_then(|p| p.max_users)))
            .unwrap_or(DEFAULT_MAX_USERS);

        let max_devices = request
            .max_devices
            .or(positive(plan.and_then(|p| p.max_devices)))
            .unwrap_or(DEFAULT_MAX_DEVICES);

        let max_api_calls_per_month = request
            .max_api_calls_per_month
            .or(positive(plan.and_then(|p| p.max_api_calls_per_month)));

        let valid_days = request
            .valid_days
            .or(positive(plan.and_then(|p| p.default_valid_days(license_type))))
            .unwrap_or(DEFAULT_VALID_DAYS);

        // Explicit entries override the plan's entry for the same key
        let mut features = plan.map(|p| p.features.clone()).unwrap_or_default();
        if let Some(explicit) = &request.features {
            features.extend(explicit.iter().map(|(k, v)| (k.clone(), *v)));
        }

        Self {
            license_type,
            max_users,
            max_devices,
            max_api_calls_per_month,
            valid_days,
            features,
        }
    }
}

fn normalize_email(email: Option<&str>) -> Result<String> {
    let email = email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::InvalidRequest("Licensee email is required".into()))?;

    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AppError::InvalidRequest(format!(
            "Invalid licensee email: {}",
            email
        ))),
    }
}

fn validate_overrides(request: &IssueRequest) -> Result<()> {
    let overrides = [
        ("max_users", request.max_users),
        ("max_devices", request.max_devices),
        ("max_api_calls_per_month", request.max_api_calls_per_month),
        ("valid_days", request.valid_days),
    ];
    for (field, value) in overrides {
        if let Some(v) = value
            && v <= 0
        {
            return Err(AppError::InvalidRequest(format!(
                "{} must be positive (got {})",
                field, v
            )));
        }
    }
    if let Some(features) = &request.features
        && features.keys().any(|k| k.trim().is_empty())
    {
        return Err(AppError::InvalidRequest("Feature keys must not be empty".into()));
    }
    Ok(())
}

/// Issue a new signed license.
///
/// Inputs are validated and the plan resolved before any key material
/// exists. The license row and its entitlements are written in one
/// transaction; if that fails nothing is persisted and the signed claims
/// are dropped with the error. The plaintext key is returned here and
/// never again.
pub fn issue(state: &AppState, request: IssueRequest) -> Result<IssuedLicense> {
    let email = normalize_email(request.email.as_deref())?;
    validate_overrides(&request)?;

    let plan = match request.plan.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(reference) => {
            let found = state.plans.find_plan(reference)?;
            if found.is_none() {
                tracing::warn!(
                    "Plan {} not found, issuing with explicit values and defaults",
                    reference
                );
            }
            found
        }
        None => None,
    };

    let terms = LicenseTerms::resolve(&request, plan.as_ref());
    let plan_code = plan.as_ref().map(|p| p.code.clone());
    let now = state.now();
    let expires_at = terms
        .valid_days
        .checked_mul(SECONDS_PER_DAY)
        .and_then(|secs| now.checked_add(secs))
        .ok_or_else(|| {
            AppError::InvalidRequest(format!(
                "valid_days {} is out of range",
                terms.valid_days
            ))
        })?;

    let (verifying_key, signing_key) = crypto::generate_key_pair()?;
    let license_key = crypto::generate_license_key(plan_code.as_deref());
    let license_key_hash = crypto::hash_license_key(&license_key);

    let claims = LicenseClaims {
        iss: state.issuer.clone(),
        sub: email.clone(),
        plan: plan_code.clone(),
        license_type: terms.license_type,
        features: terms.features.clone(),
        max_users: terms.max_users,
        max_devices: terms.max_devices,
        max_api_calls_per_month: terms.max_api_calls_per_month,
        iat: now,
        exp: expires_at,
        jti: queries::gen_id(),
    };
    let (signed_data, signature) = crypto::sign_claims(signing_key, &claims)?;

    let license = License {
        id: queries::gen_id(),
        license_key_hash,
        licensee_email: email,
        issuer: claims.iss.clone(),
        issued_by: request.issued_by.clone(),
        plan_id: plan.as_ref().map(|p| p.id.clone()),
        plan_code: plan_code.clone(),
        license_type: terms.license_type,
        features: terms.features.clone(),
        max_users: terms.max_users,
        max_devices: terms.max_devices,
        max_api_calls_per_month: terms.max_api_calls_per_month,
        jti: claims.jti.clone(),
        signed_data,
        signature,
        public_key: crypto::encode_public_key(&verifying_key),
        status: LicenseStatus::Active,
        revocation_reason: None,
        revoked_at: None,
        revoked_by: None,
        suspended_at: None,
        issued_at: now,
        expires_at: Some(expires_at),
        last_validated_at: None,
        last_heartbeat_at: None,
        created_at: now,
    };

    let entitlements: Vec<Entitlement> = terms
        .features
        .iter()
        .map(|(key, grant)| {
            Entitlement::from_grant(queries::gen_id(), &license.id, key, *grant, now)
        })
        .collect();

    let mut conn = state.db.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    queries::insert_license(&tx, &license)?;
    for entitlement in &entitlements {
        queries::insert_entitlement(&tx, entitlement)?;
    }
    tx.commit()?;

    tracing::info!(
        "Issued license {} (plan: {}, type: {}, devices: {}, entitlements: {})",
        license.id,
        plan_code.as_deref().unwrap_or("none"),
        license.license_type,
        license.max_devices,
        entitlements.len()
    );

    Ok(IssuedLicense {
        license_id: license.id,
        license_key,
        public_key: license.public_key,
        signed_data: license.signed_data,
        signature: license.signature,
        status: license.status,
        license_type: license.license_type,
        plan_code,
        max_devices: license.max_devices,
        issued_at: now,
        expires_at,
        entitlement_count: entitlements.len(),
    })
}
