mod from_row;
pub mod queries;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::clock::Clock;
use crate::error::Result;
use crate::plans::PlanCatalog;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Shared state for every operation: the main store, the audit store
/// (validation logs), the clock, and the plan catalog.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub audit: DbPool,
    pub clock: Arc<dyn Clock>,
    pub plans: Arc<dyn PlanCatalog>,
    /// `iss` claim stamped on every issued license
    pub issuer: String,
}

impl AppState {
    pub fn now(&self) -> i64 {
        self.clock.now()
    }
}

/// Open a pooled file database in WAL mode. Writers wait up to five seconds
/// for the lock before surfacing a busy error.
pub fn open_pool(path: &str, max_size: u32) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
    });
    Ok(Pool::builder().max_size(max_size).build(manager)?)
}

/// Single-connection in-memory pool. Each in-memory connection is its own
/// database, so the pool must never hand out a second one.
pub fn memory_pool() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    Ok(Pool::builder().max_size(1).build(manager)?)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS plans (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            license_type TEXT,
            features TEXT NOT NULL DEFAULT '{}',
            max_users INTEGER,
            max_devices INTEGER,
            max_api_calls_per_month INTEGER,
            valid_days INTEGER,
            trial_days INTEGER,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            license_key_hash TEXT NOT NULL UNIQUE,
            licensee_email TEXT NOT NULL,
            issuer TEXT NOT NULL,
            issued_by TEXT,
            plan_id TEXT,
            plan_code TEXT,
            license_type TEXT NOT NULL,
            features TEXT NOT NULL DEFAULT '{}',
            max_users INTEGER NOT NULL,
            max_devices INTEGER NOT NULL,
            max_api_calls_per_month INTEGER,
            jti TEXT NOT NULL UNIQUE,
            signed_data TEXT NOT NULL,
            signature TEXT NOT NULL,
            public_key TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            revocation_reason TEXT,
            revoked_at INTEGER,
            revoked_by TEXT,
            suspended_at INTEGER,
            issued_at INTEGER NOT NULL,
            expires_at INTEGER,
            last_validated_at INTEGER,
            last_heartbeat_at INTEGER,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_licenses_email ON licenses(licensee_email);

        CREATE TABLE IF NOT EXISTS entitlements (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id),
            feature_key TEXT NOT NULL,
            feature_name TEXT NOT NULL,
            is_enabled INTEGER NOT NULL DEFAULT 1,
            usage_limit INTEGER,
            usage_current INTEGER NOT NULL DEFAULT 0,
            valid_until INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(license_id, feature_key)
        );

        CREATE TABLE IF NOT EXISTS device_activations (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id),
            device_fingerprint_hash TEXT NOT NULL,
            device_name TEXT,
            device_type TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            activated_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,
            deactivated_at INTEGER,
            deactivation_reason TEXT,
            session_count INTEGER NOT NULL DEFAULT 1,
            UNIQUE(license_id, device_fingerprint_hash)
        );
        CREATE INDEX IF NOT EXISTS idx_devices_active ON device_activations(license_id, is_active);

        CREATE TABLE IF NOT EXISTS usage_logs (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id),
            entitlement_id TEXT NOT NULL REFERENCES entitlements(id),
            feature_key TEXT NOT NULL,
            action TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            metadata TEXT,
            request_id TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_usage_request
            ON usage_logs(license_id, request_id) WHERE request_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_usage_entitlement ON usage_logs(entitlement_id, created_at);",
    )?;
    Ok(())
}

pub fn init_audit_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS validation_logs (
            id TEXT PRIMARY KEY,
            license_id TEXT,
            license_key_hash TEXT NOT NULL,
            device_fingerprint_hash TEXT,
            ip_address TEXT,
            user_agent TEXT,
            result TEXT NOT NULL,
            details TEXT,
            duration_ms INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_validation_key ON validation_logs(license_key_hash, created_at);
        CREATE INDEX IF NOT EXISTS idx_validation_time ON validation_logs(created_at);",
    )?;
    Ok(())
}
