use std::sync::{Arc, Barrier};
use std::thread;

use crate::common::*;

#[test]
fn test_activation_lifecycle_scenario() {
    let env = test_env();
    let issued = issue_basic(&env.state, 2);

    let a = activate(&env.state, &issued.license_key, "device-a").unwrap();
    assert_eq!(a.status, ActivationStatus::Created);
    assert_eq!(a.active_devices, 1);
    assert_eq!(a.max_devices, 2);

    let b = activate(&env.state, &issued.license_key, "device-b").unwrap();
    assert_eq!(b.active_devices, 2);

    let c = activate(&env.state, &issued.license_key, "device-c");
    assert!(matches!(c, Err(AppError::CapacityExceeded(_))));

    let freed = deactivate_fingerprint(&env.state, &issued.license_key, "device-a");
    assert!(freed.deactivated);
    assert_eq!(freed.device_id, a.device.id);
    assert_eq!(freed.active_devices, 1);

    let c = activate(&env.state, &issued.license_key, "device-c").unwrap();
    assert_eq!(c.status, ActivationStatus::Created);
    assert_eq!(c.active_devices, 2);

    // A is now the one locked out
    let again = activate(&env.state, &issued.license_key, "device-a");
    assert!(matches!(again, Err(AppError::CapacityExceeded(_))));
}

#[test]
fn test_repeat_activation_is_idempotent() {
    let env = test_env();
    let issued = issue_basic(&env.state, 1);

    let first = activate(&env.state, &issued.license_key, "laptop").unwrap();
    env.clock.advance(30);
    let second = activate(&env.state, &issued.license_key, "laptop").unwrap();

    assert_eq!(second.status, ActivationStatus::Existing);
    assert_eq!(second.device.id, first.device.id);
    assert_eq!(second.active_devices, 1);
    assert_eq!(second.device.session_count, 2);
    assert_eq!(second.device.last_seen_at, START + 30);
}

#[test]
fn test_reactivation_reuses_record() {
    let env = test_env();
    let issued = issue_basic(&env.state, 1);

    let first = licensing::activate(
        &env.state,
        ActivationRequest {
            license_key: issued.license_key.clone(),
            device_fingerprint: "workstation".into(),
            device: DeviceInfo {
                name: Some("Office PC".into()),
                device_type: DeviceType::Desktop,
            },
        },
    )
    .unwrap();
    deactivate_fingerprint(&env.state, &issued.license_key, "workstation");

    let back = activate(&env.state, &issued.license_key, "workstation").unwrap();
    assert_eq!(back.status, ActivationStatus::Reactivated);
    assert_eq!(back.device.id, first.device.id);
    assert!(back.device.is_active);
    assert!(back.device.deactivated_at.is_none());
    assert!(back.device.deactivation_reason.is_none());
    assert_eq!(back.device.device_name.as_deref(), Some("Office PC"));
    assert_eq!(back.device.session_count, 2);

    let devices = licensing::list_devices(&env.state, &issued.license_id).unwrap();
    assert_eq!(devices.len(), 1);
}

#[test]
fn test_fingerprint_is_stored_hashed() {
    let env = test_env();
    let issued = issue_basic(&env.state, 1);
    let result = activate(&env.state, &issued.license_key, "serial-XYZ-123").unwrap();

    assert_ne!(result.device.device_fingerprint_hash, "serial-XYZ-123");
    assert_eq!(
        result.device.device_fingerprint_hash,
        crypto::hash_fingerprint("serial-XYZ-123")
    );
}

#[test]
fn test_deactivate_twice_is_a_noop() {
    let env = test_env();
    let issued = issue_basic(&env.state, 2);
    let device = activate(&env.state, &issued.license_key, "tablet").unwrap().device;

    let target = DeactivateTarget::ById {
        license_id: issued.license_id.clone(),
        device_id: device.id.clone(),
    };
    let first = licensing::deactivate(&env.state, target.clone(), Some("replaced")).unwrap();
    assert!(first.deactivated);

    let second = licensing::deactivate(&env.state, target, None).unwrap();
    assert!(!second.deactivated);
    assert_eq!(second.active_devices, 0);

    let devices = licensing::list_devices(&env.state, &issued.license_id).unwrap();
    assert_eq!(devices[0].deactivation_reason.as_deref(), Some("replaced"));
}

#[test]
fn test_default_deactivation_reason() {
    let env = test_env();
    let issued = issue_basic(&env.state, 1);
    activate(&env.state, &issued.license_key, "phone").unwrap();
    deactivate_fingerprint(&env.state, &issued.license_key, "phone");

    let devices = licensing::list_devices(&env.state, &issued.license_id).unwrap();
    assert_eq!(devices[0].deactivation_reason.as_deref(), Some(DEFAULT_DEACTIVATION_REASON));
}

#[test]
fn test_deactivate_rejects_foreign_device() {
    let env = test_env();
    let first = issue_basic(&env.state, 1);
    let second = issue_basic(&env.state, 1);
    let device = activate(&env.state, &first.license_key, "shared").unwrap().device;

    let result = licensing::deactivate(
        &env.state,
        DeactivateTarget::ById {
            license_id: second.license_id.clone(),
            device_id: device.id,
        },
        None,
    );
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[test]
fn test_activation_requires_usable_license() {
    let env = test_env();

    let unknown = activate(&env.state, "LIC-AAAAA-AAAAA-AAAAA-AAAAA", "box");
    assert!(matches!(unknown, Err(AppError::NotFound(_))));

    let issued = issue_basic(&env.state, 1);
    let empty = activate(&env.state, &issued.license_key, "   ");
    assert!(matches!(empty, Err(AppError::InvalidRequest(_))));

    licensing::suspend(&env.state, &issued.license_id, None).unwrap();
    let suspended = activate(&env.state, &issued.license_key, "box");
    assert!(matches!(suspended, Err(AppError::InvalidState(_))));

    let expiring = issue_with(
        &env.state,
        IssueRequest {
            email: Some("dev@example.com".into()),
            valid_days: Some(1),
            ..Default::default()
        },
    );
    env.clock.advance_days(2);
    let expired = activate(&env.state, &expiring.license_key, "box");
    assert!(matches!(expired, Err(AppError::InvalidState(_))));
}

#[test]
fn test_list_devices_unknown_license() {
    let env = test_env();
    let result = licensing::list_devices(&env.state, "missing");
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[test]
fn test_concurrent_activations_never_exceed_capacity() {
    const SLOTS: i64 = 3;
    const ATTEMPTS: usize = 4;

    let dir = tempfile::tempdir().unwrap();
    let env = file_env(&dir);
    let issued = issue_basic(&env.state, SLOTS);

    let barrier = Arc::new(Barrier::new(ATTEMPTS));
    let handles: Vec<_> = (0..ATTEMPTS)
        .map(|i| {
            let state = env.state.clone();
            let key = issued.license_key.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                activate(&state, &key, &format!("racer-{}", i))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::CapacityExceeded(_))))
        .count();

    assert_eq!(succeeded, SLOTS as usize);
    assert_eq!(rejected, ATTEMPTS - SLOTS as usize);

    let info = licensing::get_license_info(&env.state, &issued.license_id).unwrap();
    assert_eq!(info.active_devices, SLOTS);
}
