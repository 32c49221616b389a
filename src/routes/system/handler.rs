use axum::extract::{Json, State};

use crate::AppState;

use super::model::{ModelsResponse, StatusResponse};

#[axum::debug_handler]
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = if state.gateway.is_maintenance() {
        "maintenance"
    } else {
        "active"
    };
    Json(StatusResponse { status })
}

#[axum::debug_handler]
pub async fn models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let models = state.gateway.catalog().candidates().to_vec();
    let free = models.iter().filter(|c| c.site_free).count();

    Json(ModelsResponse {
        total: models.len(),
        free,
        paid: models.len() - free,
        models,
    })
}
