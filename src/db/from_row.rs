//! Row mapping for every persisted entity, plus the shared column lists
//! the queries select.

use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension, Params, Row, types::Type};

use crate::error::Result;
use crate::models::*;

pub const PLAN_COLS: &str = "id, code, name, license_type, features, max_users, max_devices, \
     max_api_calls_per_month, valid_days, trial_days, created_at";

pub const LICENSE_COLS: &str = "id, license_key_hash, licensee_email, issuer, issued_by, plan_id, \
     plan_code, license_type, features, max_users, max_devices, max_api_calls_per_month, jti, \
     signed_data, signature, public_key, status, revocation_reason, revoked_at, revoked_by, \
     suspended_at, issued_at, expires_at, last_validated_at, last_heartbeat_at, created_at";

pub const ENTITLEMENT_COLS: &str = "id, license_id, feature_key, feature_name, is_enabled, \
     usage_limit, usage_current, valid_until, created_at, updated_at";

pub const DEVICE_COLS: &str = "id, license_id, device_fingerprint_hash, device_name, device_type, \
     is_active, activated_at, last_seen_at, deactivated_at, deactivation_reason, session_count";

pub const USAGE_LOG_COLS: &str = "id, license_id, entitlement_id, feature_key, action, quantity, \
     metadata, request_id, created_at";

pub const VALIDATION_LOG_COLS: &str = "id, license_id, license_key_hash, device_fingerprint_hash, \
     ip_address, user_agent, result, details, duration_ms, created_at";

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

pub fn query_one<T: FromRow, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Option<T>> {
    Ok(conn.query_row(sql, params, |row| T::from_row(row)).optional()?)
}

pub fn query_all<T: FromRow, P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| T::from_row(row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Parse a strum-backed enum column.
fn parse_enum<T: FromStr>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown enum value: {}", raw).into(),
        )
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json_opt(row: &Row, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

impl FromRow for Plan {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let license_type: Option<String> = row.get(3)?;
        Ok(Plan {
            id: row.get(0)?,
            code: row.get(1)?,
            name: row.get(2)?,
            license_type: license_type.and_then(|t| t.parse().ok()),
            features: parse_json(row, 4)?,
            max_users: row.get(5)?,
            max_devices: row.get(6)?,
            max_api_calls_per_month: row.get(7)?,
            valid_days: row.get(8)?,
            trial_days: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            license_key_hash: row.get(1)?,
            licensee_email: row.get(2)?,
            issuer: row.get(3)?,
            issued_by: row.get(4)?,
            plan_id: row.get(5)?,
            plan_code: row.get(6)?,
            license_type: parse_enum(row, 7)?,
            features: parse_json(row, 8)?,
            max_users: row.get(9)?,
            max_devices: row.get(10)?,
            max_api_calls_per_month: row.get(11)?,
            jti: row.get(12)?,
            signed_data: row.get(13)?,
            signature: row.get(14)?,
            public_key: row.get(15)?,
            status: parse_enum(row, 16)?,
            revocation_reason: row.get(17)?,
            revoked_at: row.get(18)?,
            revoked_by: row.get(19)?,
            suspended_at: row.get(20)?,
            issued_at: row.get(21)?,
            expires_at: row.get(22)?,
            last_validated_at: row.get(23)?,
            last_heartbeat_at: row.get(24)?,
            created_at: row.get(25)?,
        })
    }
}

impl FromRow for Entitlement {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Entitlement {
            id: row.get(0)?,
            license_id: row.get(1)?,
            feature_key: row.get(2)?,
            feature_name: row.get(3)?,
            is_enabled: row.get::<_, i32>(4)? != 0,
            usage_limit: row.get(5)?,
            usage_current: row.get(6)?,
            valid_until: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

impl FromRow for DeviceActivation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(DeviceActivation {
            id: row.get(0)?,
            license_id: row.get(1)?,
            device_fingerprint_hash: row.get(2)?,
            device_name: row.get(3)?,
            device_type: parse_enum(row, 4)?,
            is_active: row.get::<_, i32>(5)? != 0,
            activated_at: row.get(6)?,
            last_seen_at: row.get(7)?,
            deactivated_at: row.get(8)?,
            deactivation_reason: row.get(9)?,
            session_count: row.get(10)?,
        })
    }
}

impl FromRow for UsageLogEntry {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(UsageLogEntry {
            id: row.get(0)?,
            license_id: row.get(1)?,
            entitlement_id: row.get(2)?,
            feature_key: row.get(3)?,
            action: row.get(4)?,
            quantity: row.get(5)?,
            metadata: parse_json_opt(row, 6)?,
            request_id: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

impl FromRow for ValidationLogEntry {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ValidationLogEntry {
            id: row.get(0)?,
            license_id: row.get(1)?,
            license_key_hash: row.get(2)?,
            device_fingerprint_hash: row.get(3)?,
            ip_address: row.get(4)?,
            user_agent: row.get(5)?,
            result: parse_enum(row, 6)?,
            details: parse_json_opt(row, 7)?,
            duration_ms: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}
