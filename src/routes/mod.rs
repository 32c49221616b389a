use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};

use crate::{
    AppState,
    middleware::{identify, log_errors, require_admin},
};

pub mod admin;
pub mod chat;
pub mod system;
pub mod user;

// data URI 图片可能很大
const BODY_LIMIT: usize = 50 * 1024 * 1024;

/// 构建 `/api` 下的全部路由，CORS 由调用方决定
pub fn router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/admin/grant", post(admin::grant))
        .route("/admin/maintenance", post(admin::set_maintenance))
        .route_layer(from_fn_with_state(state.clone(), require_admin));

    let api = Router::new()
        .route("/chat", post(chat::chat))
        .route("/status", get(system::status))
        .route("/models", get(system::models))
        .route("/auth", post(user::auth))
        .route("/history", post(user::history))
        .merge(admin_routes)
        .layer(from_fn_with_state(state.clone(), identify));

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(from_fn(log_errors))
        .with_state(state)
}
