use axum::extract::{Query, State};
use serde::Deserialize;

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::{Json, Path};
use crate::licensing::{self, LicenseInfo, RevocationResult, RevokeRequest, StatusChange};
use crate::models::{DeviceActivation, IssueRequest, IssuedLicense, License, Plan};

/// POST /licenses - Issue a license. The plaintext key is only in this response.
pub async fn issue_license(
    State(state): State<AppState>,
    Json(request): Json<IssueRequest>,
) -> Result<Json<IssuedLicense>> {
    Ok(Json(licensing::issue(&state, request)?))
}

#[derive(Debug, Deserialize)]
pub struct LicenseQuery {
    pub email: String,
}

/// GET /licenses?email= - Licenses held by one licensee.
pub async fn find_licenses(
    State(state): State<AppState>,
    Query(query): Query<LicenseQuery>,
) -> Result<Json<Vec<License>>> {
    Ok(Json(licensing::find_licenses_by_email(&state, &query.email)?))
}

/// GET /plans - The plan catalog.
pub async fn list_plans(State(state): State<AppState>) -> Result<Json<Vec<Plan>>> {
    Ok(Json(state.plans.list_plans()?))
}

pub async fn get_license(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LicenseInfo>> {
    Ok(Json(licensing::get_license_info(&state, &id)?))
}

pub async fn list_license_devices(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<DeviceActivation>>> {
    Ok(Json(licensing::list_devices(&state, &id)?))
}

pub async fn revoke_license(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RevokeRequest>,
) -> Result<Json<RevocationResult>> {
    let result = licensing::revoke(
        &state,
        &id,
        &request.reason,
        request.revoked_by.as_deref(),
    )?;
    Ok(Json(result))
}

#[derive(Debug, Default, Deserialize)]
pub struct SuspendRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn suspend_license(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SuspendRequest>,
) -> Result<Json<StatusChange>> {
    Ok(Json(licensing::suspend(&state, &id, request.reason.as_deref())?))
}

pub async fn reinstate_license(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusChange>> {
    Ok(Json(licensing::reinstate(&state, &id)?))
}
