use axum::extract::{Extension, Json, State};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use crate::{
    AppState,
    error::AppError,
    middleware::Identity,
    models::Tier,
    utils::{admin_token_matches, generate_token},
};

use super::model::{AuthResponse, HistoryResponse, UidRequest};

/// 签发身份令牌。uid 首次出现时直接签发；之后只能凭该 uid 仍有效的令牌续期，
/// 或由持有管理凭证的请求代签
#[axum::debug_handler]
pub async fn auth(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Json(req): Json<UidRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let uid = req.uid.trim();
    if uid.is_empty() {
        return Err(AppError::BadRequest("uid is required".to_string()));
    }

    let presented = bearer
        .as_ref()
        .map(|TypedHeader(Authorization(bearer))| bearer.token())
        .unwrap_or("");
    let expected = state.config.admin_token.as_deref().unwrap_or("");
    let has_admin_credential = admin_token_matches(presented, expected);
    let renewing = identity.is(uid);

    // 管理员 uid 的令牌只签发给持有管理凭证的请求
    let is_admin = state.gateway.is_admin(uid);
    if is_admin && !has_admin_credential {
        tracing::warn!("Refused identity token for admin uid {}", uid);
        return Err(AppError::Unauthorized);
    }

    let (record, created) = state.gateway.users().ensure_user(uid).await?;
    if !(created || renewing || has_admin_credential) {
        tracing::warn!("Refused identity token for existing uid {} without proof", uid);
        return Err(AppError::Unauthorized);
    }
    let tier = if is_admin { Tier::Admin } else { record.tier };

    let (token, token_expires_at) = generate_token(uid, &state.config).map_err(|e| {
        tracing::error!("Failed to sign identity token: {}", e);
        AppError::InternalServerError
    })?;

    Ok(Json(AuthResponse {
        is_pro: tier.is_paid(),
        expiry: record.tier_expires_at,
        tier,
        token,
        token_expires_at,
    }))
}

#[axum::debug_handler]
pub async fn history(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<UidRequest>,
) -> Result<Json<HistoryResponse>, AppError> {
    let uid = req.uid.trim();
    if uid.is_empty() || !identity.is(uid) {
        return Err(AppError::Unauthorized);
    }

    let chats = match state.gateway.users().list_conversations(uid).await {
        Ok(chats) => chats,
        Err(e) => {
            tracing::warn!("History unavailable for {}: {}", uid, e);
            Vec::new()
        }
    };

    Ok(Json(HistoryResponse { chats }))
}
