//! Shared application state and miscellaneous response schemas.

use std::sync::Arc;

use serde::Serialize;

use crate::api::scout::WorkQueue;
use crate::control_plane::ControlPlaneClient;
use crate::golden_ticket::GoldenTicketEngine;
use crate::metrics::SharedMetrics;
use crate::model::ModelManager;
use crate::reputation::ReputationLedger;
use crate::speculative::SpeculativeConfig;

/// Everything a request handler needs, cloned cheaply per-request.
#[derive(Clone)]
pub struct AppState {
    pub model_manager: Arc<ModelManager>,
    pub reputation: Arc<ReputationLedger>,
    pub golden_ticket: Arc<GoldenTicketEngine>,
    pub control_plane: Arc<ControlPlaneClient>,
    pub work_queue: Arc<WorkQueue>,
    pub metrics: SharedMetrics,
    pub speculative_config: SpeculativeConfig,
    pub checkpoint_every_n_tokens: usize,
    pub checkpoint_tail_len: usize,
    pub start_time: std::time::Instant,
}

/// `GET /health` response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub model_name: String,
    pub control_plane_reachable: bool,
    pub uptime_seconds: u64,
}

/// `GET /v1/models` response (single-entry, OpenAI-shaped listing).
#[derive(Debug, Serialize)]
pub struct ModelListResponse {
    pub object: String,
    pub data: Vec<ModelCard>,
}

#[derive(Debug, Serialize)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub owned_by: String,
}
