use rusqlite::{Connection, params, types::Value};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    DEVICE_COLS, ENTITLEMENT_COLS, LICENSE_COLS, PLAN_COLS, USAGE_LOG_COLS, VALIDATION_LOG_COLS,
    query_all, query_one,
};

pub fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builder for single-row UPDATE statements with optional fields.
///
/// A guard clause turns the update into a compare-and-swap: the row only
/// changes if it is still in the expected state, and `execute` reports
/// whether it did.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    guard: Option<&'static str>,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            guard: None,
        }
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Set a column to an explicit value, where None writes NULL.
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    fn guard(mut self, clause: &'static str) -> Self {
        self.guard = Some(clause);
        self
    }

    fn execute(self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let mut sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        if let Some(guard) = self.guard {
            sql.push_str(" AND (");
            sql.push_str(guard);
            sql.push(')');
        }
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Plans ============

/// Insert a plan, or replace the existing plan with the same code.
pub fn upsert_plan(conn: &Connection, plan: &Plan) -> Result<()> {
    let features = serde_json::to_string(&plan.features)?;
    conn.execute(
        "INSERT INTO plans (id, code, name, license_type, features, max_users, max_devices, max_api_calls_per_month, valid_days, trial_days, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(code) DO UPDATE SET
            name = excluded.name,
            license_type = excluded.license_type,
            features = excluded.features,
            max_users = excluded.max_users,
            max_devices = excluded.max_devices,
            max_api_calls_per_month = excluded.max_api_calls_per_month,
            valid_days = excluded.valid_days,
            trial_days = excluded.trial_days",
        params![
            &plan.id,
            &plan.code,
            &plan.name,
            plan.license_type.map(|t| t.as_ref().to_string()),
            features,
            plan.max_users,
            plan.max_devices,
            plan.max_api_calls_per_month,
            plan.valid_days,
            plan.trial_days,
            plan.created_at
        ],
    )?;
    Ok(())
}

/// Look up a plan by id, falling back to its code.
pub fn get_plan(conn: &Connection, reference: &str) -> Result<Option<Plan>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM plans WHERE id = ?1 OR code = ?1 ORDER BY id = ?1 DESC LIMIT 1",
            PLAN_COLS
        ),
        params![reference],
    )
}

pub fn list_plans(conn: &Connection) -> Result<Vec<Plan>> {
    query_all(
        conn,
        &format!("SELECT {} FROM plans ORDER BY code", PLAN_COLS),
        [],
    )
}

// ============ Licenses ============

pub fn insert_license(conn: &Connection, license: &License) -> Result<()> {
    let features = serde_json::to_string(&license.features)?;
    conn.execute(
        &format!(
            "INSERT INTO licenses ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
            LICENSE_COLS
        ),
        params![
            &license.id,
            &license.license_key_hash,
            &license.licensee_email,
            &license.issuer,
            &license.issued_by,
            &license.plan_id,
            &license.plan_code,
            license.license_type.as_ref(),
            features,
            license.max_users,
            license.max_devices,
            license.max_api_calls_per_month,
            &license.jti,
            &license.signed_data,
            &license.signature,
            &license.public_key,
            license.status.as_ref(),
            &license.revocation_reason,
            license.revoked_at,
            &license.revoked_by,
            license.suspended_at,
            license.issued_at,
            license.expires_at,
            license.last_validated_at,
            license.last_heartbeat_at,
            license.created_at
        ],
    )?;
    Ok(())
}

pub fn get_license_by_id(conn: &Connection, id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        params![id],
    )
}

pub fn get_license_by_key_hash(conn: &Connection, key_hash: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE license_key_hash = ?1",
            LICENSE_COLS
        ),
        params![key_hash],
    )
}

pub fn list_licenses_by_email(conn: &Connection, email: &str) -> Result<Vec<License>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE licensee_email = ?1 ORDER BY created_at DESC",
            LICENSE_COLS
        ),
        params![email],
    )
}

pub fn update_license_validated(conn: &Connection, id: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE licenses SET last_validated_at = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    Ok(())
}

pub fn update_license_heartbeat(conn: &Connection, id: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE licenses SET last_heartbeat_at = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    Ok(())
}

/// Move a license to revoked. Returns false if it was already revoked.
pub fn revoke_license(
    conn: &Connection,
    id: &str,
    reason: &str,
    revoked_by: Option<&str>,
    now: i64,
) -> Result<bool> {
    UpdateBuilder::new("licenses", id)
        .set("status", LicenseStatus::Revoked.as_ref().to_string())
        .set("revoked_at", now)
        .set("revocation_reason", reason.to_string())
        .set_nullable("revoked_by", revoked_by.map(String::from))
        .guard("status != 'revoked'")
        .execute(conn)
}

/// active -> suspended. Returns false if the license was not active.
pub fn suspend_license(conn: &Connection, id: &str, now: i64) -> Result<bool> {
    UpdateBuilder::new("licenses", id)
        .set("status", LicenseStatus::Suspended.as_ref().to_string())
        .set("suspended_at", now)
        .guard("status = 'active'")
        .execute(conn)
}

/// suspended -> active. Returns false if the license was not suspended.
pub fn reinstate_license(conn: &Connection, id: &str) -> Result<bool> {
    UpdateBuilder::new("licenses", id)
        .set("status", LicenseStatus::Active.as_ref().to_string())
        .set_nullable::<i64>("suspended_at", None)
        .guard("status = 'suspended'")
        .execute(conn)
}

// ============ Entitlements ============

pub fn insert_entitlement(conn: &Connection, entitlement: &Entitlement) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO entitlements ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            ENTITLEMENT_COLS
        ),
        params![
            &entitlement.id,
            &entitlement.license_id,
            &entitlement.feature_key,
            &entitlement.feature_name,
            entitlement.is_enabled as i32,
            entitlement.usage_limit,
            entitlement.usage_current,
            entitlement.valid_until,
            entitlement.created_at,
            entitlement.updated_at
        ],
    )?;
    Ok(())
}

pub fn list_entitlements_for_license(
    conn: &Connection,
    license_id: &str,
) -> Result<Vec<Entitlement>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM entitlements WHERE license_id = ?1 ORDER BY feature_key",
            ENTITLEMENT_COLS
        ),
        params![license_id],
    )
}

pub fn get_entitlement(
    conn: &Connection,
    license_id: &str,
    feature_key: &str,
) -> Result<Option<Entitlement>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM entitlements WHERE license_id = ?1 AND feature_key = ?2",
            ENTITLEMENT_COLS
        ),
        params![license_id, feature_key],
    )
}

/// Add `quantity` to the usage counter in SQL and return the new total.
/// The increment happens in the database, never as read-modify-write here.
pub fn increment_entitlement_usage(
    conn: &Connection,
    id: &str,
    quantity: i64,
    now: i64,
) -> Result<i64> {
    let total = conn.query_row(
        "UPDATE entitlements SET usage_current = usage_current + ?1, updated_at = ?2
         WHERE id = ?3 RETURNING usage_current",
        params![quantity, now, id],
        |row| row.get(0),
    )?;
    Ok(total)
}

// ============ Usage Logs ============

/// Append a usage row. Returns false when a row with the same
/// `(license_id, request_id)` already exists, so a retried call is a no-op.
pub fn try_insert_usage_log(conn: &Connection, entry: &UsageLogEntry) -> Result<bool> {
    let metadata = entry
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let affected = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO usage_logs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            USAGE_LOG_COLS
        ),
        params![
            &entry.id,
            &entry.license_id,
            &entry.entitlement_id,
            &entry.feature_key,
            &entry.action,
            entry.quantity,
            metadata,
            &entry.request_id,
            entry.created_at
        ],
    )?;
    Ok(affected > 0)
}

pub fn list_usage_logs_for_license(
    conn: &Connection,
    license_id: &str,
) -> Result<Vec<UsageLogEntry>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM usage_logs WHERE license_id = ?1 ORDER BY created_at, rowid",
            USAGE_LOG_COLS
        ),
        params![license_id],
    )
}

// ============ Devices ============

pub fn insert_device(conn: &Connection, device: &DeviceActivation) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO device_activations ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            DEVICE_COLS
        ),
        params![
            &device.id,
            &device.license_id,
            &device.device_fingerprint_hash,
            &device.device_name,
            device.device_type.as_ref(),
            device.is_active as i32,
            device.activated_at,
            device.last_seen_at,
            device.deactivated_at,
            &device.deactivation_reason,
            device.session_count
        ],
    )?;
    Ok(())
}

pub fn get_device_by_id(conn: &Connection, id: &str) -> Result<Option<DeviceActivation>> {
    query_one(
        conn,
        &format!("SELECT {} FROM device_activations WHERE id = ?1", DEVICE_COLS),
        params![id],
    )
}

pub fn get_device_by_fingerprint(
    conn: &Connection,
    license_id: &str,
    fingerprint_hash: &str,
) -> Result<Option<DeviceActivation>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM device_activations WHERE license_id = ?1 AND device_fingerprint_hash = ?2",
            DEVICE_COLS
        ),
        params![license_id, fingerprint_hash],
    )
}

pub fn list_devices_for_license(
    conn: &Connection,
    license_id: &str,
) -> Result<Vec<DeviceActivation>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM device_activations WHERE license_id = ?1 ORDER BY activated_at, rowid",
            DEVICE_COLS
        ),
        params![license_id],
    )
}

pub fn count_active_devices(conn: &Connection, license_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM device_activations WHERE license_id = ?1 AND is_active = 1",
        params![license_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

/// Record another session on an already-active device.
pub fn touch_device_session(conn: &Connection, id: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE device_activations SET last_seen_at = ?1, session_count = session_count + 1 WHERE id = ?2",
        params![now, id],
    )?;
    Ok(())
}

pub fn update_device_last_seen(conn: &Connection, id: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE device_activations SET last_seen_at = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    Ok(())
}

/// Bring an inactive device back on the same row, keeping its history.
/// A supplied name replaces the stored one; otherwise it is kept.
pub fn reactivate_device(conn: &Connection, id: &str, info: &DeviceInfo, now: i64) -> Result<bool> {
    let changed = UpdateBuilder::new("device_activations", id)
        .set("is_active", 1)
        .set("last_seen_at", now)
        .set_nullable::<i64>("deactivated_at", None)
        .set_nullable::<String>("deactivation_reason", None)
        .set_opt("device_name", info.name.clone())
        .set("device_type", info.device_type.as_ref().to_string())
        .guard("is_active = 0")
        .execute(conn)?;

    if changed {
        conn.execute(
            "UPDATE device_activations SET session_count = session_count + 1 WHERE id = ?1",
            params![id],
        )?;
    }
    Ok(changed)
}

/// Deactivate one device. Returns false if it was already inactive.
pub fn deactivate_device(conn: &Connection, id: &str, reason: &str, now: i64) -> Result<bool> {
    UpdateBuilder::new("device_activations", id)
        .set("is_active", 0)
        .set("deactivated_at", now)
        .set("deactivation_reason", reason.to_string())
        .guard("is_active = 1")
        .execute(conn)
}

/// Deactivate every active device of a license. Returns the number changed.
pub fn deactivate_all_devices(
    conn: &Connection,
    license_id: &str,
    reason: &str,
    now: i64,
) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE device_activations SET is_active = 0, deactivated_at = ?1, deactivation_reason = ?2
         WHERE license_id = ?3 AND is_active = 1",
        params![now, reason, license_id],
    )?;
    Ok(affected)
}

// ============ Validation Logs (audit database) ============

pub fn create_validation_log(conn: &Connection, entry: &ValidationLogEntry) -> Result<()> {
    let details = entry.details.as_ref().map(|d| d.to_string());
    conn.execute(
        &format!(
            "INSERT INTO validation_logs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            VALIDATION_LOG_COLS
        ),
        params![
            &entry.id,
            &entry.license_id,
            &entry.license_key_hash,
            &entry.device_fingerprint_hash,
            &entry.ip_address,
            &entry.user_agent,
            entry.result.as_ref(),
            details,
            entry.duration_ms,
            entry.created_at
        ],
    )?;
    Ok(())
}

/// Most recent validation attempts for a key hash, newest first.
pub fn list_validation_logs_for_key(
    conn: &Connection,
    license_key_hash: &str,
    limit: i64,
) -> Result<Vec<ValidationLogEntry>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM validation_logs WHERE license_key_hash = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            VALIDATION_LOG_COLS
        ),
        params![license_key_hash, limit],
    )
}

/// Delete validation logs older than `retention_days`. Returns the number removed.
pub fn purge_old_validation_logs(
    conn: &Connection,
    retention_days: i64,
    now: i64,
) -> Result<usize> {
    let cutoff = now - retention_days * crate::clock::SECONDS_PER_DAY;
    let deleted = conn.execute(
        "DELETE FROM validation_logs WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}
