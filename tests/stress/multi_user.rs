//! Multi-user stress test.
//!
//! Concurrency is "many independent requests, each with its own engine
//! handle" (§5) — never many requests sharing one handle. This drives that
//! shape directly: several speculative-decoding streams running at once,
//! each backed by its own fake engine/control-plane pair, plus concurrent
//! writers hammering the process-wide reputation ledger.

use futures::future::BoxFuture;
use futures::{StreamExt, Stream};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use shard_engine::checkpoint::CheckpointManager;
use shard_engine::control_plane::{ControlPlane, DraftResult};
use shard_engine::engine::{EngineBinding, TokenId};
use shard_engine::errors::Result;
use shard_engine::golden_ticket::{GoldenTicketEngine, GoldenTicketEngineConfig};
use shard_engine::reputation::ReputationLedger;
use shard_engine::speculative::{speculative_generate, NoopHooks, SpeculativeConfig};

/// A fixed-script engine double identical in spirit to the crate's own
/// speculative-loop tests, duplicated here because integration tests build
/// against the published crate, not its private `#[cfg(test)]` items.
struct ScriptedEngine {
    script: Mutex<VecDeque<(TokenId, String)>>,
}

impl ScriptedEngine {
    fn new(n: usize, tag: &str) -> Self {
        let script = (0..n)
            .map(|i| (i as TokenId, format!("{tag}-{i}")))
            .collect();
        Self { script: Mutex::new(script) }
    }
}

impl EngineBinding for ScriptedEngine {
    fn vocab_size(&self) -> usize {
        32000
    }

    fn tokenize<'a>(&'a self, _text: &'a str) -> BoxFuture<'a, Result<Vec<TokenId>>> {
        Box::pin(async move { Ok(vec![0]) })
    }

    fn piece(&self, id: TokenId) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move { Ok(format!("tok{id}")) })
    }

    fn eval<'a>(&'a self, _ids: &'a [TokenId]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn argmax(&self) -> BoxFuture<'_, Result<(TokenId, String)>> {
        Box::pin(async move {
            let mut script = self.script.lock().unwrap();
            Ok(script.pop_front().unwrap_or((-1, String::new())))
        })
    }

    fn rollback(&self, _k: u32) -> BoxFuture<'_, Result<u32>> {
        Box::pin(async move { Ok(0) })
    }

    fn snapshot_export(&self) -> BoxFuture<'_, Result<(u32, Vec<u8>)>> {
        Box::pin(async move { Ok((0, vec![])) })
    }

    fn snapshot_import<'a>(&'a self, _n_past: u32, _payload: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn position(&self) -> u32 {
        0
    }

    fn is_eog(&self, id: TokenId) -> bool {
        id == -1
    }
}

struct EmptyControlPlane {
    poll_calls: AtomicUsize,
}

impl ControlPlane for EmptyControlPlane {
    fn broadcast_work<'a>(
        &'a self,
        _request_id: &'a str,
        _context: &'a str,
        _min_tokens: usize,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move { true })
    }

    fn try_pop_result(&self, _timeout: Duration) -> BoxFuture<'_, Option<DraftResult>> {
        self.poll_calls.fetch_add(1, Ordering::Relaxed);
        Box::pin(async move { None })
    }

    fn submit_draft_result<'a>(
        &'a self,
        _work_id: &'a str,
        _scout_id: &'a str,
        _draft_text: &'a str,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move { true })
    }
}

fn run_request(tag: String, reputation: Arc<ReputationLedger>, golden_ticket: Arc<GoldenTicketEngine>) -> impl Stream<Item = Result<String>> {
    let engine: Arc<dyn EngineBinding> = Arc::new(ScriptedEngine::new(5, &tag));
    let control_plane: Arc<dyn ControlPlane> = Arc::new(EmptyControlPlane { poll_calls: AtomicUsize::new(0) });
    let checkpoint = Arc::new(CheckpointManager::new(8, 256));
    speculative_generate(
        engine,
        control_plane,
        reputation,
        golden_ticket,
        checkpoint,
        Arc::new(NoopHooks),
        tag,
        vec![1],
        SpeculativeConfig {
            max_tokens: 5,
            broadcast_throttle: Duration::from_millis(0),
            scout_timeout: Duration::from_millis(5),
            context_tail_pieces: 100,
            broadcast_min_tokens: 4,
        },
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn concurrent_requests_each_get_independent_engine_state() {
    let reputation = Arc::new(ReputationLedger::open_in_memory().unwrap());
    let golden_ticket = Arc::new(GoldenTicketEngine::new(GoldenTicketEngineConfig {
        injection_rate: 0.0,
        ..GoldenTicketEngineConfig::default()
    }));

    let mut handles = Vec::new();
    for i in 0..10 {
        let tag = format!("req{i}");
        let reputation = reputation.clone();
        let golden_ticket = golden_ticket.clone();
        handles.push(tokio::spawn(async move {
            let stream = run_request(tag.clone(), reputation, golden_ticket);
            tokio::pin!(stream);
            let mut out = Vec::new();
            while let Some(piece) = stream.next().await {
                out.push(piece.unwrap());
            }
            (tag, out)
        }));
    }

    let results = futures::future::join_all(handles).await;
    for result in results {
        let (tag, pieces) = result.expect("task should not panic");
        // Each request's stream only ever yields pieces from its own script —
        // no cross-talk between concurrently-running engine handles.
        assert_eq!(pieces.len(), 5);
        for piece in &pieces {
            assert!(piece.starts_with(&tag), "piece {piece} leaked from another request's engine");
        }
    }
}

#[tokio::test]
async fn reputation_ledger_serializes_concurrent_writers() {
    let ledger = Arc::new(ReputationLedger::open_in_memory().unwrap());

    let mut handles = Vec::new();
    for i in 0..20 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            let scout = format!("scout-{}", i % 4);
            ledger.upsert(&scout, i % 3 != 0, 0.70, 3, 24.0);
        }));
    }
    for handle in handles {
        handle.await.expect("writer task should not panic");
    }

    // Every peer_id that appeared must have a consistent attempts tally —
    // no lost updates from unsynchronized concurrent access.
    let mut total_attempts = 0u32;
    for rep in ledger.list_reputations() {
        assert!(rep.attempts >= rep.correct);
        total_attempts += rep.attempts;
    }
    assert_eq!(total_attempts, 20);
}
