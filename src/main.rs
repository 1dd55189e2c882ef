use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use licensing_core::clock::{Clock, SystemClock};
use licensing_core::config::Config;
use licensing_core::db::{self, AppState, queries};
use licensing_core::handlers;
use licensing_core::models::Plan;
use licensing_core::plans::DbPlanCatalog;

#[derive(Parser, Debug)]
#[command(name = "licensing-core", version, about = "License management server")]
struct Args {
    /// Bind address (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Main database path (overrides DATABASE_PATH)
    #[arg(long)]
    database: Option<String>,
}

/// Upsert every plan in a JSON array file into the catalog table.
fn load_plan_catalog(pool: &db::DbPool, path: &str, now: i64) -> Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan catalog {}", path))?;
    let plans: Vec<Plan> =
        serde_json::from_str(&raw).with_context(|| format!("Invalid plan catalog {}", path))?;

    let conn = pool.get()?;
    for mut plan in plans.iter().cloned() {
        if plan.id.is_empty() {
            plan.id = queries::gen_id();
        }
        if plan.created_at == 0 {
            plan.created_at = now;
        }
        queries::upsert_plan(&conn, &plan)?;
    }
    Ok(plans.len())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "licensing_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }

    let db_pool = db::open_pool(&config.database_path, 16)?;
    let audit_pool = db::open_pool(&config.audit_database_path, 4)?;
    db::init_db(&*db_pool.get()?)?;
    db::init_audit_db(&*audit_pool.get()?)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let now = clock.now();

    if let Some(path) = &config.plan_catalog_path {
        let count = load_plan_catalog(&db_pool, path, now)?;
        tracing::info!("Loaded {} plan(s) from {}", count, path);
    }

    if config.validation_log_retention_days > 0 {
        let purged = queries::purge_old_validation_logs(
            &*audit_pool.get()?,
            config.validation_log_retention_days,
            now,
        )?;
        if purged > 0 {
            tracing::info!(
                "Purged {} validation log(s) older than {} days",
                purged,
                config.validation_log_retention_days
            );
        }
    }

    let state = AppState {
        db: db_pool.clone(),
        audit: audit_pool,
        clock,
        plans: Arc::new(DbPlanCatalog::new(db_pool)),
        issuer: config.issuer.clone(),
    };

    let app = handlers::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    tracing::info!("Starting licensing-core on {} (issuer: {})", addr, config.issuer);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutdown complete");
    Ok(())
}
