use crate::common::*;

#[test]
fn test_revoke_cascades_to_devices() {
    let env = test_env();
    let issued = issue_basic(&env.state, 3);
    for fingerprint in ["one", "two", "three"] {
        activate(&env.state, &issued.license_key, fingerprint).unwrap();
    }
    env.clock.advance(120);

    let result = licensing::revoke(
        &env.state,
        &issued.license_id,
        "refund issued",
        Some("ops@example.com"),
    )
    .unwrap();
    assert!(!result.already_revoked);
    assert_eq!(result.devices_deactivated, 3);
    assert_eq!(result.revoked_at, Some(START + 120));

    let info = licensing::get_license_info(&env.state, &issued.license_id).unwrap();
    assert_eq!(info.effective_status, LicenseStatus::Revoked);
    assert_eq!(info.active_devices, 0);
    assert_eq!(info.license.revocation_reason.as_deref(), Some("refund issued"));
    assert_eq!(info.license.revoked_by.as_deref(), Some("ops@example.com"));
    assert!(info.devices.iter().all(|d| {
        !d.is_active && d.deactivation_reason.as_deref() == Some(REVOKED_DEVICE_REASON)
    }));

    let response = validate(&env.state, &issued.license_key, Some("one"));
    assert_eq!(response.outcome, ValidationOutcome::Revoked);

    let reactivate = activate(&env.state, &issued.license_key, "one");
    assert!(matches!(reactivate, Err(AppError::InvalidState(_))));
}

#[test]
fn test_revoke_twice_is_idempotent() {
    let env = test_env();
    let issued = issue_basic(&env.state, 1);
    licensing::revoke(&env.state, &issued.license_id, "first", None).unwrap();
    env.clock.advance(10);

    let again = licensing::revoke(&env.state, &issued.license_id, "second", None).unwrap();
    assert!(again.already_revoked);
    assert_eq!(again.devices_deactivated, 0);
    assert_eq!(again.revoked_at, Some(START));

    let license = load_license(&env.state, &issued.license_id);
    assert_eq!(license.revocation_reason.as_deref(), Some("first"));
}

#[test]
fn test_revoke_validation() {
    let env = test_env();
    let issued = issue_basic(&env.state, 1);

    let blank = licensing::revoke(&env.state, &issued.license_id, "  ", None);
    assert!(matches!(blank, Err(AppError::InvalidRequest(_))));

    let missing = licensing::revoke(&env.state, "no-such-license", "fraud", None);
    assert!(matches!(missing, Err(AppError::NotFound(_))));
}

#[test]
fn test_suspend_and_reinstate() {
    let env = test_env();
    let issued = issue_basic(&env.state, 1);
    activate(&env.state, &issued.license_key, "desk").unwrap();

    let suspended = licensing::suspend(&env.state, &issued.license_id, Some("audit")).unwrap();
    assert!(suspended.changed);
    assert_eq!(suspended.status, LicenseStatus::Suspended);

    let again = licensing::suspend(&env.state, &issued.license_id, None).unwrap();
    assert!(!again.changed);

    // Devices stay bound through a suspension
    let info = licensing::get_license_info(&env.state, &issued.license_id).unwrap();
    assert_eq!(info.active_devices, 1);
    assert_eq!(info.license.suspended_at, Some(START));

    let reinstated = licensing::reinstate(&env.state, &issued.license_id).unwrap();
    assert_eq!(reinstated.status, LicenseStatus::Active);
    assert!(validate(&env.state, &issued.license_key, Some("desk")).valid);

    let not_suspended = licensing::reinstate(&env.state, &issued.license_id);
    assert!(matches!(not_suspended, Err(AppError::InvalidState(_))));
}

#[test]
fn test_revoked_is_terminal() {
    let env = test_env();
    let issued = issue_basic(&env.state, 1);
    licensing::revoke(&env.state, &issued.license_id, "fraud", None).unwrap();

    let suspend = licensing::suspend(&env.state, &issued.license_id, None);
    assert!(matches!(suspend, Err(AppError::InvalidState(_))));

    let reinstate = licensing::reinstate(&env.state, &issued.license_id);
    assert!(matches!(reinstate, Err(AppError::InvalidState(_))));

    assert_eq!(
        load_license(&env.state, &issued.license_id).status,
        LicenseStatus::Revoked
    );
}

#[test]
fn test_suspended_license_can_be_revoked() {
    let env = test_env();
    let issued = issue_basic(&env.state, 1);
    licensing::suspend(&env.state, &issued.license_id, None).unwrap();

    let result = licensing::revoke(&env.state, &issued.license_id, "closed account", None).unwrap();
    assert!(!result.already_revoked);
    assert_eq!(
        licensing::get_license_info(&env.state, &issued.license_id)
            .unwrap()
            .effective_status,
        LicenseStatus::Revoked
    );
}
