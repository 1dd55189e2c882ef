use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub audit_database_path: String,
    /// `iss` claim stamped on issued licenses
    pub issuer: String,
    /// JSON array of plans upserted into the catalog at startup
    pub plan_catalog_path: Option<String>,
    /// Days to retain validation logs before purging (0 = never purge)
    pub validation_log_retention_days: i64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let validation_log_retention_days: i64 = env::var("VALIDATION_LOG_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(90);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "licensing.db".to_string()),
            audit_database_path: env::var("AUDIT_DATABASE_PATH")
                .unwrap_or_else(|_| "licensing_audit.db".to_string()),
            issuer: env::var("LICENSE_ISSUER")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "licensing-core".to_string()),
            plan_catalog_path: env::var("PLAN_CATALOG_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            validation_log_retention_days,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
