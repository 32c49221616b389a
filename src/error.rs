use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::models::QuotaKind;

/// 存储层错误，网关会吞掉并降级处理
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// 网关业务错误，全部以文本形式回给前端
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{kind:?} quota exceeded")]
    QuotaExceeded { kind: QuotaKind },

    #[error("all upstream candidates failed after {attempts} attempts")]
    UpstreamUnavailable { attempts: usize },

    #[error("no upstream API key configured")]
    ConfigurationMissing,

    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("failed to read model catalog {path}: {reason}")]
    Catalog { path: String, reason: String },
}

/// HTTP 层错误
#[derive(Debug)]
pub enum AppError {
    Unauthorized,
    BadRequest(String),
    ServiceUnavailable,
    InternalServerError,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    code: i32,
    error_message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason),
            AppError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Storage is temporarily unavailable".to_string(),
            ),
            AppError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            code: status.as_u16() as i32,
            error_message,
        });

        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        tracing::error!("Store operation failed: {}", e);
        AppError::ServiceUnavailable
    }
}
