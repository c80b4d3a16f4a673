//! Control Plane Client.
//!
//! Typed client to the networking sidecar. Every failure — connect error, timeout,
//! non-2xx status, decode error — coalesces into a `bool`/`None` result at this
//! boundary; nothing here ever raises to the speculative loop, which derives all
//! retry/backoff policy itself. Grounded in the original's
//! `RustControlPlaneClient` stub (`inference.py`) for the method shapes and in
//! `oracle_api.py`'s base-URL + timeout client construction.

use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_BROADCAST_TIMEOUT_S: f64 = 2.0;
pub const DEFAULT_SCOUT_RESULT_TIMEOUT_S: f64 = 0.15;

#[derive(Debug, Clone, Serialize)]
struct BroadcastWorkRequest<'a> {
    request_id: &'a str,
    prompt_context: &'a str,
    min_tokens: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DraftResult {
    pub work_id: String,
    #[serde(alias = "peer_id")]
    pub scout_id: String,
    #[serde(default)]
    pub draft_tokens: Vec<String>,
    #[serde(default)]
    pub draft_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PopResultResponse {
    result: Option<DraftResult>,
}

#[derive(Debug, Clone, Serialize)]
struct SubmitDraftRequest<'a> {
    work_id: &'a str,
    scout_id: &'a str,
    draft_text: &'a str,
    timestamp: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthInfo {
    pub connected_peers: u32,
}

pub struct ControlPlaneClient {
    client: reqwest::Client,
    base_url: String,
    broadcast_timeout: Duration,
}

impl ControlPlaneClient {
    pub fn new(base_url: impl Into<String>, broadcast_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            broadcast_timeout,
        }
    }

    pub fn with_default_timeout(base_url: impl Into<String>) -> Self {
        Self::new(base_url, Duration::from_secs_f64(DEFAULT_BROADCAST_TIMEOUT_S))
    }

    /// Announces the current broadcast context. Returns `false` on any failure —
    /// the loop records the broadcast attempt unconditionally regardless.
    pub async fn broadcast_work(&self, request_id: &str, context: &str, min_tokens: usize) -> bool {
        let url = format!("{}/broadcast-work", self.base_url);
        let body = BroadcastWorkRequest {
            request_id,
            prompt_context: context,
            min_tokens,
        };

        let result = tokio::time::timeout(
            self.broadcast_timeout,
            self.client.post(&url).json(&body).send(),
        )
        .await;

        match result {
            Ok(Ok(resp)) if resp.status().is_success() => true,
            Ok(Ok(resp)) => {
                debug!("broadcast_work non-success status: {}", resp.status());
                false
            }
            Ok(Err(e)) => {
                debug!("broadcast_work request failed: {e}");
                false
            }
            Err(_) => {
                debug!("broadcast_work timed out");
                false
            }
        }
    }

    /// Polls for a draft with a bounded timeout. `None` on timeout, unreachable
    /// sidecar, or genuinely empty queue — callers cannot distinguish these, by
    /// design.
    pub async fn try_pop_result(&self, timeout: Duration) -> Option<DraftResult> {
        let url = format!("{}/pop-result", self.base_url);

        let result = tokio::time::timeout(timeout, self.client.get(&url).send()).await;

        match result {
            Ok(Ok(resp)) if resp.status().is_success() => {
                match resp.json::<PopResultResponse>().await {
                    Ok(parsed) => parsed.result,
                    Err(e) => {
                        debug!("pop-result decode failed: {e}");
                        None
                    }
                }
            }
            Ok(Ok(resp)) => {
                debug!("pop-result non-success status: {}", resp.status());
                None
            }
            Ok(Err(e)) => {
                debug!("pop-result request failed: {e}");
                None
            }
            Err(_) => None,
        }
    }

    pub async fn submit_draft_result(&self, work_id: &str, scout_id: &str, draft_text: &str) -> bool {
        let url = format!("{}/submit-draft", self.base_url);
        let body = SubmitDraftRequest {
            work_id,
            scout_id,
            draft_text,
            timestamp: crate::golden_ticket::now_secs(),
        };

        let result = tokio::time::timeout(
            self.broadcast_timeout,
            self.client.post(&url).json(&body).send(),
        )
        .await;

        matches!(result, Ok(Ok(resp)) if resp.status().is_success())
    }

    pub async fn health(&self) -> Option<HealthInfo> {
        let url = format!("{}/health", self.base_url);
        let result = tokio::time::timeout(self.broadcast_timeout, self.client.get(&url).send()).await;

        match result {
            Ok(Ok(resp)) if resp.status().is_success() => resp.json::<HealthInfo>().await.ok(),
            _ => None,
        }
    }
}

/// Trait view of [`ControlPlaneClient`] so the speculative loop can be
/// driven in tests against a fake sidecar with no network involved — mirrors
/// the teacher's use of plain mock structs for orchestration tests.
pub trait ControlPlane: Send + Sync {
    fn broadcast_work<'a>(
        &'a self,
        request_id: &'a str,
        context: &'a str,
        min_tokens: usize,
    ) -> BoxFuture<'a, bool>;

    fn try_pop_result(&self, timeout: Duration) -> BoxFuture<'_, Option<DraftResult>>;

    fn submit_draft_result<'a>(
        &'a self,
        work_id: &'a str,
        scout_id: &'a str,
        draft_text: &'a str,
    ) -> BoxFuture<'a, bool>;
}

impl ControlPlane for ControlPlaneClient {
    fn broadcast_work<'a>(
        &'a self,
        request_id: &'a str,
        context: &'a str,
        min_tokens: usize,
    ) -> BoxFuture<'a, bool> {
        Box::pin(self.broadcast_work(request_id, context, min_tokens))
    }

    fn try_pop_result(&self, timeout: Duration) -> BoxFuture<'_, Option<DraftResult>> {
        Box::pin(self.try_pop_result(timeout))
    }

    fn submit_draft_result<'a>(
        &'a self,
        work_id: &'a str,
        scout_id: &'a str,
        draft_text: &'a str,
    ) -> BoxFuture<'a, bool> {
        Box::pin(self.submit_draft_result(work_id, scout_id, draft_text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_sidecar_coalesces_to_false_and_none() {
        // Nothing is listening on this port; every call must soft-fail, never panic
        // or return Err to the caller.
        let client = ControlPlaneClient::new(
            "http://127.0.0.1:1",
            Duration::from_millis(200),
        );
        assert!(!client.broadcast_work("req-1", "ctx", 5).await);
        assert!(client.try_pop_result(Duration::from_millis(200)).await.is_none());
        assert!(!client.submit_draft_result("w1", "scout-1", "text").await);
        assert!(client.health().await.is_none());
    }
}
