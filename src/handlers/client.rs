use axum::{extract::State, http::HeaderMap};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use serde::Deserialize;

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::licensing::{
    self, ActivationRequest, ActivationResult, DeactivateTarget, DeactivationResult,
    FeatureCheckRequest, FeatureDecision, HeartbeatRequest, HeartbeatResponse, UsageReceipt,
    UsageRecord, ValidateRequest, ValidationResponse,
};
use crate::models::Entitlement;
use crate::util::extract_request_info;

/// POST /validate - Always 200 for a classified key; check `valid`/`outcome`.
pub async fn validate_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<ValidationResponse>> {
    let context = extract_request_info(&headers);
    Ok(Json(licensing::validate(&state, &request, &context)?))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>> {
    Ok(Json(licensing::heartbeat(&state, &request)?))
}

pub async fn activate_device(
    State(state): State<AppState>,
    Json(request): Json<ActivationRequest>,
) -> Result<Json<ActivationResult>> {
    Ok(Json(licensing::activate(&state, request)?))
}

#[derive(Debug, Deserialize)]
pub struct DeactivateRequest {
    #[serde(flatten)]
    pub target: DeactivateTarget,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn deactivate_device(
    State(state): State<AppState>,
    Json(request): Json<DeactivateRequest>,
) -> Result<Json<DeactivationResult>> {
    let result = licensing::deactivate(&state, request.target, request.reason.as_deref())?;
    Ok(Json(result))
}

pub async fn check_feature(
    State(state): State<AppState>,
    Json(request): Json<FeatureCheckRequest>,
) -> Result<Json<FeatureDecision>> {
    let decision = licensing::check_feature(&state, &request.license_key, &request.feature_key)?;
    Ok(Json(decision))
}

/// POST /usage - Records consumption. Does not enforce limits.
pub async fn log_usage(
    State(state): State<AppState>,
    Json(record): Json<UsageRecord>,
) -> Result<Json<UsageReceipt>> {
    Ok(Json(licensing::log_usage(&state, record)?))
}

/// GET /entitlements - License key is passed in the Authorization header,
/// never in the URL.
pub async fn get_entitlements(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Vec<Entitlement>>> {
    Ok(Json(licensing::get_entitlements(&state, auth.token())?))
}
