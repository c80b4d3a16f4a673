//! API route configuration

use axum::{
    routing::{get, post},
    Router,
};

use super::chat::chat_completions;
use super::health::{health, list_models, metrics};
use super::schema::AppState;
use super::scout::{
    broadcast_work, get_reputation, list_banned, poll_work, pop_result, reset_reputation,
    sidecar_health, submit_draft, submit_scout_draft, unban,
};

/// Builds the full application router: the OpenAI-compatible surface, the
/// ambient health/metrics endpoints, the scout-facing work queue, the
/// reputation admin surface, and the bare sidecar-shaped paths
/// `ControlPlaneClient` speaks when pointed back at this same process.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/scout/reputation/:peer_id", get(get_reputation))
        .route("/v1/scout/banned", get(list_banned))
        .route("/v1/scout/unban/:peer_id", post(unban))
        .route("/v1/scout/reset-reputation/:peer_id", post(reset_reputation))
        .route("/v1/scout/draft", post(submit_scout_draft))
        .route("/v1/scout/work", get(poll_work))
        // Bare paths shaped like the real P2P sidecar's API, so
        // `ControlPlaneClient` can be pointed back at this same process
        // (under a `/sidecar` prefix) when no separate sidecar is running.
        .route("/sidecar/broadcast-work", post(broadcast_work))
        .route("/sidecar/pop-result", get(pop_result))
        .route("/sidecar/submit-draft", post(submit_draft))
        .route("/sidecar/health", get(sidecar_health))
        .with_state(state)
}
