use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use crate::{
    AppState,
    error::AppError,
    utils::{Claims, admin_token_matches, verify_token},
};

/// 请求方身份，由 [`identify`] 写入请求扩展
#[derive(Debug, Clone, Default)]
pub struct Identity(pub Option<Claims>);

impl Identity {
    /// 已验证的 uid
    pub fn subject(&self) -> Option<&str> {
        self.0.as_ref().map(|claims| claims.sub.as_str())
    }

    pub fn is(&self, user_id: &str) -> bool {
        self.subject() == Some(user_id)
    }
}

/// 可选身份：携带有效令牌时记录 Claims，无令牌或令牌无效时为匿名
pub async fn identify(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let claims = bearer.and_then(|TypedHeader(Authorization(bearer))| {
        match verify_token(bearer.token(), &state.config) {
            Ok(claims) => Some(claims),
            Err(e) => {
                tracing::debug!("Ignoring invalid identity token: {}", e);
                None
            }
        }
    });
    req.extensions_mut().insert(Identity(claims));

    next.run(req).await
}

/// 管理接口：要求 `Authorization: Bearer <ADMIN_TOKEN>`
pub async fn require_admin(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let expected = state.config.admin_token.as_deref().unwrap_or("");

    match bearer {
        Some(TypedHeader(Authorization(bearer)))
            if admin_token_matches(bearer.token(), expected) =>
        {
            Ok(next.run(req).await)
        }
        _ => {
            tracing::warn!("Rejected admin request to {}", req.uri().path());
            Err(AppError::Unauthorized)
        }
    }
}
