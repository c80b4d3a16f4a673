//! Liveness, model listing, and metrics exposition.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use crate::api::schema::{AppState, HealthResponse, ModelCard, ModelListResponse};

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let control_plane_reachable = state.control_plane.health().await.is_some();
    let info = state.model_manager.info();

    Json(HealthResponse {
        status: "ok".to_string(),
        model_loaded: true,
        model_name: info.name.clone(),
        control_plane_reachable,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

pub async fn list_models(State(state): State<AppState>) -> Json<ModelListResponse> {
    let info = state.model_manager.info();
    Json(ModelListResponse {
        object: "list".to_string(),
        data: vec![ModelCard {
            id: info.name.clone(),
            object: "model".to_string(),
            created: 0,
            owned_by: "shard".to_string(),
        }],
    })
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics.render_prometheus();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
