//! Scout-facing endpoints and the admin surface over the reputation ledger.
//!
//! No P2P sidecar runs alongside this process, so [`WorkQueue`] doubles as a
//! local-loopback stand-in: it backs both the bare `/broadcast-work`,
//! `/pop-result`, `/submit-draft`, `/health` paths the teacher's
//! `ControlPlaneClient` speaks (when `control_plane.base_url` points back at
//! this same process) and the `/v1/scout/*` paths an actual remote Scout
//! would poll and submit to.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::schema::AppState;
use crate::control_plane::{DraftResult, HealthInfo};
use crate::errors::{Result, ShardError};
use crate::golden_ticket::new_request_id;

/// Work item handed to the next Scout that polls.
#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    pub work_id: String,
    pub request_id: String,
    pub prompt_context: String,
    pub min_tokens: usize,
}

struct Inner {
    pending_work: VecDeque<WorkItem>,
    work_owner: HashMap<String, String>,
    pending_results: VecDeque<DraftResult>,
}

/// FIFO work/result queue, the shape a minimal P2P broadcast sidecar would
/// expose over HTTP.
pub struct WorkQueue {
    inner: Mutex<Inner>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending_work: VecDeque::new(),
                work_owner: HashMap::new(),
                pending_results: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn broadcast(&self, request_id: &str, prompt_context: &str, min_tokens: usize) -> WorkItem {
        let work_id = new_request_id();
        let item = WorkItem {
            work_id: work_id.clone(),
            request_id: request_id.to_string(),
            prompt_context: prompt_context.to_string(),
            min_tokens,
        };
        let mut inner = self.lock();
        inner.work_owner.insert(work_id.clone(), request_id.to_string());
        inner.pending_work.push_back(item.clone());
        item
    }

    pub fn next_work(&self) -> Option<WorkItem> {
        self.lock().pending_work.pop_front()
    }

    pub fn submit_draft(&self, draft: DraftResult) {
        self.lock().pending_results.push_back(draft);
    }

    pub fn pop_result(&self) -> Option<DraftResult> {
        self.lock().pending_results.pop_front()
    }
}

// ---- Bare sidecar-shaped endpoints (hit by ControlPlaneClient) ----

#[derive(Debug, Deserialize)]
pub struct BroadcastWorkBody {
    request_id: String,
    prompt_context: String,
    min_tokens: usize,
}

pub async fn broadcast_work(
    State(state): State<AppState>,
    Json(body): Json<BroadcastWorkBody>,
) -> Json<WorkItem> {
    let item = state
        .work_queue
        .broadcast(&body.request_id, &body.prompt_context, body.min_tokens);
    Json(item)
}

#[derive(Debug, Serialize)]
pub struct PopResultResponse {
    result: Option<DraftResult>,
}

pub async fn pop_result(State(state): State<AppState>) -> Json<PopResultResponse> {
    Json(PopResultResponse {
        result: state.work_queue.pop_result(),
    })
}

#[derive(Debug, Deserialize)]
pub struct SubmitDraftBody {
    work_id: String,
    scout_id: String,
    draft_text: String,
}

pub async fn submit_draft(
    State(state): State<AppState>,
    Json(body): Json<SubmitDraftBody>,
) -> Json<serde_json::Value> {
    state.work_queue.submit_draft(DraftResult {
        work_id: body.work_id,
        scout_id: body.scout_id,
        draft_tokens: Vec::new(),
        draft_text: Some(body.draft_text),
    });
    Json(serde_json::json!({ "accepted": true }))
}

pub async fn sidecar_health() -> Json<HealthInfo> {
    Json(HealthInfo { connected_peers: 0 })
}

// ---- `/v1/scout/*` endpoints, as an untrusted remote Scout would call them ----

pub async fn poll_work(State(state): State<AppState>) -> Json<Option<WorkItem>> {
    Json(state.work_queue.next_work())
}

#[derive(Debug, Deserialize)]
pub struct ScoutDraftBody {
    pub work_id: String,
    pub scout_id: String,
    #[serde(default)]
    pub draft_tokens: Vec<String>,
    #[serde(default)]
    pub draft_text: Option<String>,
}

pub async fn submit_scout_draft(
    State(state): State<AppState>,
    Json(body): Json<ScoutDraftBody>,
) -> Result<Json<serde_json::Value>> {
    if state.reputation.is_banned(&body.scout_id) {
        return Err(ShardError::ScoutBanned(body.scout_id));
    }
    state.work_queue.submit_draft(DraftResult {
        work_id: body.work_id,
        scout_id: body.scout_id,
        draft_tokens: body.draft_tokens,
        draft_text: body.draft_text,
    });
    Ok(Json(serde_json::json!({ "accepted": true })))
}

// ---- Admin surface over the reputation ledger ----

pub async fn get_reputation(
    State(state): State<AppState>,
    Path(peer_id): Path<String>,
) -> Result<Json<crate::reputation::ScoutReputation>> {
    state
        .reputation
        .get(&peer_id)
        .map(Json)
        .ok_or_else(|| ShardError::InvalidParameters(format!("unknown scout: {peer_id}")))
}

pub async fn list_banned(State(state): State<AppState>) -> Json<Vec<crate::reputation::BanEntry>> {
    Json(state.reputation.list_active_bans())
}

pub async fn unban(State(state): State<AppState>, Path(peer_id): Path<String>) -> Json<serde_json::Value> {
    let unbanned = state.reputation.unban(&peer_id);
    Json(serde_json::json!({ "unbanned": unbanned }))
}

pub async fn reset_reputation(
    State(state): State<AppState>,
    Path(peer_id): Path<String>,
) -> Json<serde_json::Value> {
    let reset = state.reputation.reset(&peer_id);
    Json(serde_json::json!({ "reset": reset }))
}
