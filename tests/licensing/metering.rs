use std::sync::{Arc, Barrier};
use std::thread;

use rusqlite::params;

use crate::common::*;

fn check(state: &AppState, license_key: &str, feature_key: &str) -> FeatureDecision {
    licensing::check_feature(state, license_key, feature_key).unwrap()
}

#[test]
fn test_usage_limit_scenario() {
    let env = test_env();
    let issued = issue_pro(&env.state);

    for used in 1..=5 {
        let decision = check(&env.state, &issued.license_key, "reports_per_month");
        assert!(decision.allowed, "call {} should be allowed", used);
        assert_eq!(decision.remaining, Some(5 - (used - 1)));

        let receipt = record_usage(&env.state, &issued.license_key, "reports_per_month", 1);
        assert!(receipt.recorded);
        assert_eq!(receipt.usage_current, used);
        assert_eq!(receipt.remaining, Some(5 - used));
    }

    let decision = check(&env.state, &issued.license_key, "reports_per_month");
    assert!(!decision.allowed);
    assert_eq!(decision.reason, Some(FeatureDenial::UsageLimitExceeded));
    assert_eq!(decision.usage_current, Some(5));
    assert_eq!(decision.remaining, Some(0));
}

#[test]
fn test_check_feature_never_consumes() {
    let env = test_env();
    let issued = issue_pro(&env.state);

    for _ in 0..10 {
        check(&env.state, &issued.license_key, "reports_per_month");
    }
    let decision = check(&env.state, &issued.license_key, "reports_per_month");
    assert_eq!(decision.usage_current, Some(0));
}

#[test]
fn test_log_usage_does_not_enforce() {
    let env = test_env();
    let issued = issue_pro(&env.state);

    let receipt = record_usage(&env.state, &issued.license_key, "reports_per_month", 7);
    assert!(receipt.recorded);
    assert_eq!(receipt.usage_current, 7);
    assert_eq!(receipt.remaining, Some(0));
}

#[test]
fn test_unlimited_feature() {
    let env = test_env();
    let issued = issue_pro(&env.state);

    record_usage(&env.state, &issued.license_key, "api_access", 1_000);
    let decision = check(&env.state, &issued.license_key, "api_access");
    assert!(decision.allowed);
    assert_eq!(decision.usage_limit, None);
    assert_eq!(decision.remaining, None);
    assert_eq!(decision.usage_current, Some(1_000));
}

#[test]
fn test_denial_reasons() {
    let env = test_env();
    let issued = issue_pro(&env.state);

    let unknown_key = check(&env.state, "PRO-XXXXX-XXXXX-XXXXX-XXXXX", "export");
    assert_eq!(unknown_key.reason, Some(FeatureDenial::InvalidLicense));

    let missing = check(&env.state, &issued.license_key, "sso");
    assert_eq!(missing.reason, Some(FeatureDenial::FeatureNotFound));

    let disabled = check(&env.state, &issued.license_key, "beta_dashboard");
    assert_eq!(disabled.reason, Some(FeatureDenial::FeatureDisabled));

    assert!(check(&env.state, &issued.license_key, "export").allowed);
}

#[test]
fn test_feature_window_expiry() {
    let env = test_env();
    let issued = issue_pro(&env.state);
    {
        let conn = env.state.db.get().unwrap();
        conn.execute(
            "UPDATE entitlements SET valid_until = ?1 WHERE license_id = ?2 AND feature_key = 'export'",
            params![START + 3_600, issued.license_id],
        )
        .unwrap();
    }

    assert!(check(&env.state, &issued.license_key, "export").allowed);
    env.clock.advance(3_601);
    let decision = check(&env.state, &issued.license_key, "export");
    assert_eq!(decision.reason, Some(FeatureDenial::FeatureExpired));
}

#[test]
fn test_unsigned_entitlement_rows_are_ignored() {
    let env = test_env();
    let issued = issue_pro(&env.state);
    {
        let conn = env.state.db.get().unwrap();
        let entitlement = Entitlement::from_grant(
            queries::gen_id(),
            &issued.license_id,
            "early_access",
            FeatureGrant::Toggle(true),
            START,
        );
        queries::insert_entitlement(&conn, &entitlement).unwrap();
    }

    let decision = check(&env.state, &issued.license_key, "early_access");
    assert_eq!(decision.reason, Some(FeatureDenial::FeatureNotFound));
    let entitlements = licensing::get_entitlements(&env.state, &issued.license_key).unwrap();
    assert_eq!(entitlements.len(), 4);
}

#[test]
fn test_license_state_gates_features() {
    let env = test_env();
    let revoked = issue_pro(&env.state);
    licensing::revoke(&env.state, &revoked.license_id, "refund", None).unwrap();
    assert_eq!(
        check(&env.state, &revoked.license_key, "export").reason,
        Some(FeatureDenial::InvalidLicense)
    );

    let suspended = issue_pro(&env.state);
    licensing::suspend(&env.state, &suspended.license_id, None).unwrap();
    assert_eq!(
        check(&env.state, &suspended.license_key, "export").reason,
        Some(FeatureDenial::InvalidLicense)
    );

    let expiring = issue_pro(&env.state);
    env.clock.advance_days(31);
    assert_eq!(
        check(&env.state, &expiring.license_key, "export").reason,
        Some(FeatureDenial::Expired)
    );
}

#[test]
fn test_request_id_makes_usage_idempotent() {
    let env = test_env();
    let issued = issue_pro(&env.state);
    let record = UsageRecord {
        license_key: issued.license_key.clone(),
        feature_key: "reports_per_month".into(),
        action: "generate".into(),
        quantity: 2,
        metadata: Some(serde_json::json!({ "report": "quarterly" })),
        request_id: Some("req-42".into()),
    };

    let first = licensing::log_usage(&env.state, record.clone()).unwrap();
    assert!(first.recorded);
    assert_eq!(first.usage_current, 2);

    let retry = licensing::log_usage(&env.state, record).unwrap();
    assert!(!retry.recorded);
    assert_eq!(retry.usage_current, 2);

    let conn = env.state.db.get().unwrap();
    let logs = queries::list_usage_logs_for_license(&conn, &issued.license_id).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "generate");
    assert_eq!(logs[0].quantity, 2);
    assert_eq!(logs[0].metadata, Some(serde_json::json!({ "report": "quarterly" })));
}

#[test]
fn test_usage_counter_matches_log_sum() {
    let env = test_env();
    let issued = issue_pro(&env.state);
    for quantity in [1, 3, 2, 4] {
        record_usage(&env.state, &issued.license_key, "api_access", quantity);
    }

    let conn = env.state.db.get().unwrap();
    let logged: i64 = conn
        .query_row(
            "SELECT SUM(quantity) FROM usage_logs WHERE license_id = ?1 AND feature_key = 'api_access'",
            params![issued.license_id],
            |row| row.get(0),
        )
        .unwrap();
    let entitlement = queries::get_entitlement(&conn, &issued.license_id, "api_access")
        .unwrap()
        .unwrap();
    assert_eq!(logged, 10);
    assert_eq!(entitlement.usage_current, logged);
}

#[test]
fn test_concurrent_usage_is_never_lost() {
    const THREADS: usize = 4;
    const CALLS: usize = 25;

    let dir = tempfile::tempdir().unwrap();
    let env = file_env(&dir);
    let issued = issue_pro(&env.state);

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let state = env.state.clone();
            let key = issued.license_key.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..CALLS {
                    record_usage(&state, &key, "api_access", 1);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let conn = env.state.db.get().unwrap();
    let logged: i64 = conn
        .query_row(
            "SELECT SUM(quantity) FROM usage_logs WHERE license_id = ?1 AND feature_key = 'api_access'",
            params![issued.license_id],
            |row| row.get(0),
        )
        .unwrap();
    let entitlement = queries::get_entitlement(&conn, &issued.license_id, "api_access")
        .unwrap()
        .unwrap();
    assert_eq!(entitlement.usage_current, (THREADS * CALLS) as i64);
    assert_eq!(entitlement.usage_current, logged);
}

#[test]
fn test_log_usage_rejects_bad_input() {
    let env = test_env();
    let issued = issue_pro(&env.state);

    let zero = licensing::log_usage(
        &env.state,
        UsageRecord {
            license_key: issued.license_key.clone(),
            feature_key: "api_access".into(),
            action: "use".into(),
            quantity: 0,
            metadata: None,
            request_id: None,
        },
    );
    assert!(matches!(zero, Err(AppError::InvalidRequest(_))));

    let missing_feature = licensing::log_usage(
        &env.state,
        UsageRecord {
            license_key: issued.license_key.clone(),
            feature_key: "sso".into(),
            action: "use".into(),
            quantity: 1,
            metadata: None,
            request_id: None,
        },
    );
    assert!(matches!(missing_feature, Err(AppError::NotFound(_))));

    let unknown = licensing::get_entitlements(&env.state, "PRO-XXXXX-XXXXX-XXXXX-XXXXX");
    assert!(matches!(unknown, Err(AppError::NotFound(_))));
}
