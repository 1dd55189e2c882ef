mod client;
mod licenses;

pub use client::*;
pub use licenses::*;

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    // Operator-facing license administration
    let admin_routes = Router::new()
        .route("/plans", get(list_plans))
        .route("/licenses", post(issue_license).get(find_licenses))
        .route("/licenses/{id}", get(get_license))
        .route("/licenses/{id}/devices", get(list_license_devices))
        .route("/licenses/{id}/revoke", post(revoke_license))
        .route("/licenses/{id}/suspend", post(suspend_license))
        .route("/licenses/{id}/reinstate", post(reinstate_license));

    // Client-facing calls, authenticated by the license key itself
    let client_routes = Router::new()
        .route("/validate", post(validate_license))
        .route("/heartbeat", post(heartbeat))
        .route("/devices/activate", post(activate_device))
        .route("/devices/deactivate", post(deactivate_device))
        .route("/features/check", post(check_feature))
        .route("/usage", post(log_usage))
        .route("/entitlements", get(get_entitlements));

    Router::new()
        .route("/health", get(health))
        .merge(admin_routes)
        .merge(client_routes)
}
