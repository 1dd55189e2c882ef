//! Shared fixtures: in-memory stores, a manual clock, and a small plan catalog.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

pub use licensing_core::clock::{Clock, ManualClock, SECONDS_PER_DAY};
pub use licensing_core::crypto;
pub use licensing_core::db::{self, AppState, DbPool, queries};
pub use licensing_core::error::AppError;
pub use licensing_core::licensing::{self, *};
pub use licensing_core::models::*;
pub use licensing_core::plans::StaticPlanCatalog;
pub use licensing_core::util::RequestContext;

/// 2023-11-14T22:13:20Z
pub const START: i64 = 1_700_000_000;

pub struct TestEnv {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
}

pub fn pro_plan() -> Plan {
    let mut features = FeatureMap::new();
    features.insert("export".into(), FeatureGrant::Toggle(true));
    features.insert("beta_dashboard".into(), FeatureGrant::Toggle(false));
    features.insert("reports_per_month".into(), FeatureGrant::Limit(5));
    features.insert("api_access".into(), FeatureGrant::Limit(0));
    Plan {
        id: "plan-pro".into(),
        code: "pro".into(),
        name: "Pro".into(),
        license_type: Some(LicenseType::Subscription),
        features,
        max_users: Some(5),
        max_devices: Some(2),
        max_api_calls_per_month: Some(10_000),
        valid_days: Some(30),
        trial_days: Some(14),
        created_at: START,
    }
}

fn build_state(db: DbPool, audit: DbPool, clock: Arc<ManualClock>) -> AppState {
    db::init_db(&db.get().unwrap()).unwrap();
    db::init_audit_db(&audit.get().unwrap()).unwrap();
    AppState {
        db,
        audit,
        clock: clock.clone(),
        plans: Arc::new(StaticPlanCatalog::new([pro_plan()])),
        issuer: "test-issuer".into(),
    }
}

/// Single-connection in-memory stores. Never hold a connection from
/// `state.db` while calling an operation.
pub fn test_env() -> TestEnv {
    let clock = Arc::new(ManualClock::new(START));
    let state = build_state(
        db::memory_pool().unwrap(),
        db::memory_pool().unwrap(),
        clock.clone(),
    );
    TestEnv { state, clock }
}

/// File-backed stores with several connections, for concurrency tests.
pub fn file_env(dir: &TempDir) -> TestEnv {
    let clock = Arc::new(ManualClock::new(START));
    let db_path = dir.path().join("licensing.db");
    let audit_path = dir.path().join("audit.db");
    let state = build_state(
        db::open_pool(db_path.to_str().unwrap(), 8).unwrap(),
        db::open_pool(audit_path.to_str().unwrap(), 8).unwrap(),
        clock.clone(),
    );
    TestEnv { state, clock }
}

pub fn issue_with(state: &AppState, request: IssueRequest) -> IssuedLicense {
    licensing::issue(state, request).expect("issue license")
}

/// A standard license with no plan and the given device capacity.
pub fn issue_basic(state: &AppState, max_devices: i64) -> IssuedLicense {
    issue_with(
        state,
        IssueRequest {
            email: Some("dev@example.com".into()),
            max_devices: Some(max_devices),
            ..Default::default()
        },
    )
}

pub fn issue_pro(state: &AppState) -> IssuedLicense {
    issue_with(
        state,
        IssueRequest {
            email: Some("team@example.com".into()),
            plan: Some("pro".into()),
            ..Default::default()
        },
    )
}

pub fn activate(
    state: &AppState,
    license_key: &str,
    fingerprint: &str,
) -> Result<ActivationResult, AppError> {
    licensing::activate(
        state,
        ActivationRequest {
            license_key: license_key.to_string(),
            device_fingerprint: fingerprint.to_string(),
            device: DeviceInfo::default(),
        },
    )
}

pub fn validate(
    state: &AppState,
    license_key: &str,
    fingerprint: Option<&str>,
) -> ValidationResponse {
    licensing::validate(
        state,
        &ValidateRequest {
            license_key: license_key.to_string(),
            device_fingerprint: fingerprint.map(String::from),
        },
        &RequestContext::default(),
    )
    .expect("validate")
}

pub fn deactivate_fingerprint(
    state: &AppState,
    license_key: &str,
    fingerprint: &str,
) -> DeactivationResult {
    licensing::deactivate(
        state,
        DeactivateTarget::ByFingerprint {
            license_key: license_key.to_string(),
            device_fingerprint: fingerprint.to_string(),
        },
        None,
    )
    .expect("deactivate")
}

pub fn record_usage(
    state: &AppState,
    license_key: &str,
    feature_key: &str,
    quantity: i64,
) -> UsageReceipt {
    licensing::log_usage(
        state,
        UsageRecord {
            license_key: license_key.to_string(),
            feature_key: feature_key.to_string(),
            action: "use".into(),
            quantity,
            metadata: None,
            request_id: None,
        },
    )
    .expect("log usage")
}

pub fn load_license(state: &AppState, license_id: &str) -> License {
    let conn = state.db.get().unwrap();
    queries::get_license_by_id(&conn, license_id).unwrap().unwrap()
}

pub fn validation_logs(state: &AppState, license_key: &str) -> Vec<ValidationLogEntry> {
    let conn = state.audit.get().unwrap();
    let key_hash = crypto::hash_license_key(license_key);
    queries::list_validation_logs_for_key(&conn, &key_hash, 100).unwrap()
}
