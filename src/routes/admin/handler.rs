use axum::extract::{Json, State};
use chrono::{Duration, Utc};

use crate::{AppState, error::AppError, models::Tier};

use super::model::{GrantRequest, GrantResponse, MaintenanceRequest, MaintenanceResponse};

// 单次授权最长十年
const MAX_GRANT_DAYS: i64 = 3650;

#[axum::debug_handler]
pub async fn grant(
    State(state): State<AppState>,
    Json(req): Json<GrantRequest>,
) -> Result<Json<GrantResponse>, AppError> {
    let target = req.target_uid.trim();
    if target.is_empty() {
        return Err(AppError::BadRequest("targetUid is required".to_string()));
    }
    if !(1..=MAX_GRANT_DAYS).contains(&req.duration) {
        return Err(AppError::BadRequest(format!(
            "duration must be between 1 and {} days",
            MAX_GRANT_DAYS
        )));
    }

    let tier = match req.tier.as_deref() {
        None => Tier::Pro,
        Some(raw) => raw
            .parse::<Tier>()
            .map_err(|e| AppError::BadRequest(e.to_string()))?,
    };
    if !matches!(tier, Tier::Pro | Tier::Ultra) {
        return Err(AppError::BadRequest(format!("{} cannot be granted", tier)));
    }

    let expiry = Utc::now() + Duration::days(req.duration);
    let record = state
        .gateway
        .users()
        .set_user_tier(target, tier, Some(expiry))
        .await?;

    tracing::info!(
        "Granted {} to {} until {}",
        record.tier,
        record.user_id,
        expiry.to_rfc3339()
    );

    Ok(Json(GrantResponse {
        target_uid: record.user_id,
        tier: record.tier,
        expiry: record.tier_expires_at,
    }))
}

#[axum::debug_handler]
pub async fn set_maintenance(
    State(state): State<AppState>,
    Json(req): Json<MaintenanceRequest>,
) -> Json<MaintenanceResponse> {
    state.gateway.set_maintenance(req.enabled);
    Json(MaintenanceResponse {
        status: if req.enabled { "maintenance" } else { "active" },
    })
}
