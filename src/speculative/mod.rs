//! Speculative Loop — the orchestrator.
//!
//! Pulls local ground-truth tokens from the [`EngineBinding`], races them
//! against drafts offered by untrusted Scouts over the [`ControlPlane`], and
//! yields a lazy, finite `Stream` of decoded pieces. Grounded in the
//! original implementation's `cooperative_generate` pull-loop (broadcast
//! cadence, last-100-token context join, poll-then-verify shape) and in the
//! teacher's `inference/speculative.rs` accept/reject/correction state
//! machine (accept streak, single correction token, break on first
//! mismatch), restructured around the engine/control-plane traits instead of
//! the teacher's dual-model-in-one-function design.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::try_stream;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::checkpoint::CheckpointManager;
use crate::control_plane::ControlPlane;
use crate::engine::{EngineBinding, TokenId};
use crate::errors::Result;
use crate::golden_ticket::{BroadcastContext, GoldenTicketEngine};
use crate::reputation::ReputationLedger;

/// Tunables for one speculative-decoding run.
#[derive(Debug, Clone)]
pub struct SpeculativeConfig {
    pub max_tokens: usize,
    pub broadcast_throttle: Duration,
    pub scout_timeout: Duration,
    pub context_tail_pieces: usize,
    /// `min_tokens` sent with every `broadcast_work` call — how many tokens a
    /// Scout is asked to draft ahead.
    pub broadcast_min_tokens: usize,
}

impl Default for SpeculativeConfig {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            broadcast_throttle: Duration::from_millis(50),
            scout_timeout: Duration::from_millis(150),
            context_tail_pieces: 100,
            broadcast_min_tokens: 8,
        }
    }
}

/// One `{tokens, local_generate_ms, network_rtt_plus_verify_ms}` sample per
/// loop iteration.
#[derive(Debug, Clone)]
pub struct LatencySample {
    pub tokens: usize,
    pub local_generate_ms: f64,
    pub network_rtt_plus_verify_ms: f64,
}

/// One event per admitted (or dropped) draft.
#[derive(Debug, Clone)]
pub struct ScoutEvent {
    pub scout_id: String,
    pub accepted: bool,
    pub accepted_tokens: usize,
    pub draft_tokens: usize,
    pub reason: &'static str,
}

/// Optional telemetry sink. Default no-op so callers that don't care about
/// per-token latency or scout outcomes can omit hooks entirely.
pub trait SpeculativeHooks: Send + Sync {
    fn on_latency(&self, _sample: LatencySample) {}
    fn on_scout_event(&self, _event: ScoutEvent) {}
    /// A Golden Ticket replaced the broadcast context for this opportunity.
    fn on_golden_ticket_injected(&self) {}
    /// A Golden Ticket in flight was just verified, correct or not.
    fn on_golden_ticket_verdict(&self, _passed: bool) {}
    /// `scout_id` just crossed the ban threshold as a result of this request.
    fn on_scout_banned(&self, _scout_id: &str) {}
}

pub struct NoopHooks;
impl SpeculativeHooks for NoopHooks {}

/// Runs the speculative loop and returns a lazy, finite stream of decoded
/// token pieces. Dropping the stream cancels the loop at its next suspension
/// point — callers that want explicit early cancellation can also trigger
/// `cancel`.
#[allow(clippy::too_many_arguments)]
pub fn speculative_generate(
    engine: Arc<dyn EngineBinding>,
    control_plane: Arc<dyn ControlPlane>,
    reputation: Arc<ReputationLedger>,
    golden_ticket: Arc<GoldenTicketEngine>,
    checkpoint: Arc<CheckpointManager>,
    hooks: Arc<dyn SpeculativeHooks>,
    request_id: String,
    prompt_tokens: Vec<TokenId>,
    config: SpeculativeConfig,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<String>> {
    try_stream! {
        if !prompt_tokens.is_empty() {
            engine.eval(&prompt_tokens).await?;
        }

        let mut generated: Vec<String> = Vec::new();
        let mut tokens_emitted: usize = 0;
        let mut last_broadcast: Option<Instant> = None;
        let remote_disabled = AtomicBool::new(false);

        'outer: while tokens_emitted < config.max_tokens {
            if cancel.is_cancelled() {
                debug!(request_id = %request_id, "speculative loop cancelled");
                break;
            }

            // 1. Local step: the engine's own argmax is always ground truth.
            let local_start = Instant::now();
            let (token, piece) = engine.argmax().await?;
            if engine.is_eog(token) {
                debug!(request_id = %request_id, "engine reached end-of-generation");
                break;
            }
            engine.eval(&[token]).await?;
            generated.push(piece.clone());
            tokens_emitted += 1;
            let local_elapsed = local_start.elapsed();
            yield piece;

            if tokens_emitted >= config.max_tokens {
                break;
            }

            // 2. Snapshot at cadence.
            if checkpoint.should_checkpoint(tokens_emitted) {
                if let Ok((n_past, payload)) = engine.snapshot_export().await {
                    checkpoint.capture(n_past, payload, &generated);
                }
            }

            let network_start = Instant::now();

            // 3. Throttled broadcast.
            let should_broadcast = last_broadcast
                .map(|t| t.elapsed() >= config.broadcast_throttle)
                .unwrap_or(true);
            if should_broadcast {
                let tail_start = generated.len().saturating_sub(config.context_tail_pieces);
                let normal_context = generated[tail_start..].join(" ");
                let broadcast_ctx = golden_ticket.maybe_inject(&request_id, normal_context);
                let broadcast_text = match &broadcast_ctx {
                    BroadcastContext::Normal(s) => s.clone(),
                    BroadcastContext::Ticket(t) => {
                        hooks.on_golden_ticket_injected();
                        t.prompt.clone()
                    }
                };
                // Recorded unconditionally, including on failure, so a dead
                // sidecar never produces a tight broadcast retry loop.
                let _ = control_plane
                    .broadcast_work(&request_id, &broadcast_text, config.broadcast_min_tokens)
                    .await;
                last_broadcast = Some(Instant::now());
            }

            // 4. Remote draft admit.
            if remote_disabled.load(Ordering::Relaxed) {
                continue 'outer;
            }

            let poll_start = Instant::now();
            let draft = control_plane.try_pop_result(config.scout_timeout).await;
            let poll_elapsed = poll_start.elapsed();

            let Some(draft) = draft else {
                // `try_pop_result` coalesces timeout/unreachable/empty into
                // the same `None` — wall-clock elapsed time is the only
                // signal left to distinguish a hard timeout (which
                // should permanently degrade this request to pure local
                // autoregression) from a fast, genuinely empty poll.
                if poll_elapsed >= config.scout_timeout {
                    debug!(request_id = %request_id, "scout poll timed out, disabling remote drafts");
                    remote_disabled.store(true, Ordering::Relaxed);
                }
                // A fast empty poll (no timeout) is treated as "no drafts
                // right now", not a signal to restore the last checkpoint —
                // this implementation has no independent drift detector, so
                // restoring here would discard already-verified tokens for
                // no evidence of actual divergence.
                let network_elapsed = network_start.elapsed();
                hooks.on_latency(LatencySample {
                    tokens: tokens_emitted,
                    local_generate_ms: local_elapsed.as_secs_f64() * 1000.0,
                    network_rtt_plus_verify_ms: network_elapsed.as_secs_f64() * 1000.0,
                });
                continue 'outer;
            };

            // 5. Verify.
            if reputation.is_banned(&draft.scout_id) {
                hooks.on_scout_event(ScoutEvent {
                    scout_id: draft.scout_id.clone(),
                    accepted: false,
                    accepted_tokens: 0,
                    draft_tokens: draft.draft_tokens.len(),
                    reason: "banned",
                });
                let network_elapsed = network_start.elapsed();
                hooks.on_latency(LatencySample {
                    tokens: tokens_emitted,
                    local_generate_ms: local_elapsed.as_secs_f64() * 1000.0,
                    network_rtt_plus_verify_ms: network_elapsed.as_secs_f64() * 1000.0,
                });
                continue 'outer;
            }

            let response_text = draft
                .draft_text
                .clone()
                .unwrap_or_else(|| draft.draft_tokens.join(""));
            if let Some(verdict) = golden_ticket.verify(&request_id, &draft.scout_id, &response_text, &reputation) {
                hooks.on_golden_ticket_verdict(verdict);
                if !verdict {
                    if reputation.is_banned(&draft.scout_id) {
                        hooks.on_scout_banned(&draft.scout_id);
                    }
                    hooks.on_scout_event(ScoutEvent {
                        scout_id: draft.scout_id.clone(),
                        accepted: false,
                        accepted_tokens: 0,
                        draft_tokens: draft.draft_tokens.len(),
                        reason: "golden_ticket_failed",
                    });
                    let network_elapsed = network_start.elapsed();
                    hooks.on_latency(LatencySample {
                        tokens: tokens_emitted,
                        local_generate_ms: local_elapsed.as_secs_f64() * 1000.0,
                        network_rtt_plus_verify_ms: network_elapsed.as_secs_f64() * 1000.0,
                    });
                    continue 'outer;
                }
                // Correct ticket answer: fall through to normal token
                // verification, which is typically a no-op for a
                // ticket-answering draft (its `draft_tokens` carry nothing
                // worth accepting).
            }

            let mut accepted_count = 0usize;
            let mut corrected = false;
            for candidate_piece in &draft.draft_tokens {
                if tokens_emitted >= config.max_tokens {
                    break;
                }
                let (argmax_token, argmax_piece) = engine.argmax().await?;
                if engine.is_eog(argmax_token) {
                    break;
                }
                // Byte-for-byte comparison, never normalized — a draft piece
                // that differs only by whitespace/casing still counts as a
                // mismatch and falls through to correction.
                if argmax_piece == *candidate_piece {
                    engine.eval(&[argmax_token]).await?;
                    generated.push(argmax_piece.clone());
                    tokens_emitted += 1;
                    accepted_count += 1;
                    yield argmax_piece;
                } else {
                    engine.eval(&[argmax_token]).await?;
                    generated.push(argmax_piece.clone());
                    tokens_emitted += 1;
                    corrected = true;
                    yield argmax_piece;
                    break;
                }
            }

            hooks.on_scout_event(ScoutEvent {
                scout_id: draft.scout_id.clone(),
                accepted: accepted_count > 0,
                accepted_tokens: accepted_count,
                draft_tokens: draft.draft_tokens.len(),
                reason: if corrected { "corrected" } else { "full_accept" },
            });
            let network_elapsed = network_start.elapsed();
            hooks.on_latency(LatencySample {
                tokens: tokens_emitted,
                local_generate_ms: local_elapsed.as_secs_f64() * 1000.0,
                network_rtt_plus_verify_ms: network_elapsed.as_secs_f64() * 1000.0,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::DraftResult;
    use crate::golden_ticket::GoldenTicketEngineConfig;
    use futures::future::BoxFuture;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted engine double: `argmax` yields the next token in `script` on
    /// every call, regardless of how many `eval`s happened in between — the
    /// tests only care about the sequence of ground-truth tokens the loop
    /// observes, not a faithful KV cache.
    struct FakeEngine {
        script: Mutex<VecDeque<(TokenId, String)>>,
        eog_id: TokenId,
        eval_calls: std::sync::atomic::AtomicUsize,
    }

    impl FakeEngine {
        fn new(pieces: &[&str]) -> Self {
            let script = pieces
                .iter()
                .enumerate()
                .map(|(i, p)| (i as TokenId, p.to_string()))
                .collect();
            Self {
                script: Mutex::new(script),
                eog_id: -1,
                eval_calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    impl EngineBinding for FakeEngine {
        fn vocab_size(&self) -> usize {
            32000
        }

        fn tokenize<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<TokenId>>> {
            let n = text.split_whitespace().count().max(1) as TokenId;
            Box::pin(async move { Ok((0..n).collect()) })
        }

        fn piece(&self, id: TokenId) -> BoxFuture<'_, Result<String>> {
            Box::pin(async move { Ok(format!("tok{id}")) })
        }

        fn eval<'a>(&'a self, _ids: &'a [TokenId]) -> BoxFuture<'a, Result<()>> {
            self.eval_calls.fetch_add(1, Ordering::Relaxed);
            Box::pin(async move { Ok(()) })
        }

        fn argmax(&self) -> BoxFuture<'_, Result<(TokenId, String)>> {
            Box::pin(async move {
                let mut script = self.script.lock().unwrap();
                Ok(script.pop_front().unwrap_or((self.eog_id, String::new())))
            })
        }

        fn rollback(&self, _k: u32) -> BoxFuture<'_, Result<u32>> {
            Box::pin(async move { Ok(0) })
        }

        fn snapshot_export(&self) -> BoxFuture<'_, Result<(u32, Vec<u8>)>> {
            Box::pin(async move { Ok((0, vec![1, 2, 3])) })
        }

        fn snapshot_import<'a>(&'a self, _n_past: u32, _payload: &'a [u8]) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move { Ok(()) })
        }

        fn position(&self) -> u32 {
            0
        }

        fn is_eog(&self, id: TokenId) -> bool {
            id == self.eog_id
        }
    }

    /// Control-plane double that hands back at most one scripted draft, then
    /// always answers empty.
    struct FakeControlPlane {
        draft: Mutex<Option<DraftResult>>,
        poll_calls: std::sync::atomic::AtomicUsize,
        /// When set, `try_pop_result` sleeps this long before answering
        /// `None`, simulating a real sidecar timeout rather than a fast
        /// empty poll.
        simulate_timeout: bool,
    }

    impl FakeControlPlane {
        fn empty() -> Self {
            Self {
                draft: Mutex::new(None),
                poll_calls: std::sync::atomic::AtomicUsize::new(0),
                simulate_timeout: false,
            }
        }

        fn with_draft(draft: DraftResult) -> Self {
            Self {
                draft: Mutex::new(Some(draft)),
                poll_calls: std::sync::atomic::AtomicUsize::new(0),
                simulate_timeout: false,
            }
        }

        fn timing_out() -> Self {
            Self {
                draft: Mutex::new(None),
                poll_calls: std::sync::atomic::AtomicUsize::new(0),
                simulate_timeout: true,
            }
        }
    }

    /// Hooks double that records every scout event, so tests can assert on
    /// accepted/draft token counts rather than only the emitted pieces.
    #[derive(Default)]
    struct RecordingHooks {
        scout_events: Mutex<Vec<ScoutEvent>>,
    }

    impl SpeculativeHooks for RecordingHooks {
        fn on_scout_event(&self, event: ScoutEvent) {
            self.scout_events.lock().unwrap().push(event);
        }
    }

    impl ControlPlane for FakeControlPlane {
        fn broadcast_work<'a>(
            &'a self,
            _request_id: &'a str,
            _context: &'a str,
            _min_tokens: usize,
        ) -> BoxFuture<'a, bool> {
            Box::pin(async move { true })
        }

        fn try_pop_result(&self, timeout: Duration) -> BoxFuture<'_, Option<DraftResult>> {
            self.poll_calls.fetch_add(1, Ordering::Relaxed);
            let simulate_timeout = self.simulate_timeout;
            Box::pin(async move {
                if simulate_timeout {
                    tokio::time::sleep(timeout).await;
                    return None;
                }
                self.draft.lock().unwrap().take()
            })
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

    fn test_config() -> SpeculativeConfig {
        SpeculativeConfig {
            max_tokens: 3,
            broadcast_throttle: Duration::from_millis(0),
            scout_timeout: Duration::from_millis(5),
            context_tail_pieces: 100,
            broadcast_min_tokens: 4,
        }
    }

    async fn collect(
        engine: Arc<dyn EngineBinding>,
        cp: Arc<dyn ControlPlane>,
        config: SpeculativeConfig,
    ) -> (Vec<String>, Arc<ReputationLedger>, Arc<GoldenTicketEngine>) {
        let reputation = Arc::new(ReputationLedger::open_in_memory().unwrap());
        let golden_ticket = Arc::new(GoldenTicketEngine::new(GoldenTicketEngineConfig {
            injection_rate: 0.0,
            ..GoldenTicketEngineConfig::default()
        }));
        let checkpoint = Arc::new(CheckpointManager::new(8, 256));
        let stream = speculative_generate(
            engine,
            cp,
            reputation.clone(),
            golden_ticket.clone(),
            checkpoint,
            Arc::new(NoopHooks),
            "req-1".to_string(),
            vec![1, 2],
            config,
            CancellationToken::new(),
        );
        tokio::pin!(stream);
        let mut out = Vec::new();
        while let Some(piece) = stream.next().await {
            out.push(piece.unwrap());
        }
        (out, reputation, golden_ticket)
    }

    #[tokio::test]
    async fn pure_local_emits_exactly_max_tokens() {
        let engine: Arc<dyn EngineBinding> = Arc::new(FakeEngine::new(&["a", "b", "c", "d"]));
        let cp: Arc<dyn ControlPlane> = Arc::new(FakeControlPlane::empty());
        let (pieces, reputation, _) = collect(engine, cp, test_config()).await;
        assert_eq!(pieces, vec!["a", "b", "c"]);
        assert!(reputation.list_reputations().is_empty());
    }

    #[tokio::test]
    async fn full_acceptance_emits_local_token_then_whole_draft() {
        let engine: Arc<dyn EngineBinding> = Arc::new(FakeEngine::new(&["L0", "A", "B", "C"]));
        let cp: Arc<dyn ControlPlane> = Arc::new(FakeControlPlane::with_draft(DraftResult {
            work_id: "w1".to_string(),
            scout_id: "scout-1".to_string(),
            draft_tokens: vec!["A".to_string(), "B".to_string(), "C".to_string()],
            draft_text: None,
        }));
        let config = SpeculativeConfig {
            max_tokens: 10,
            ..test_config()
        };
        let (pieces, _, _) = collect(engine, cp, config).await;
        assert_eq!(pieces, vec!["L0", "A", "B", "C"]);
    }

    #[tokio::test]
    async fn mismatch_in_middle_emits_correction_and_stops_draft() {
        let engine: Arc<dyn EngineBinding> = Arc::new(FakeEngine::new(&["L0", "A", "B", "C"]));
        let cp: Arc<dyn ControlPlane> = Arc::new(FakeControlPlane::with_draft(DraftResult {
            work_id: "w1".to_string(),
            scout_id: "scout-1".to_string(),
            draft_tokens: vec!["A".to_string(), "B".to_string(), "X".to_string()],
            draft_text: None,
        }));
        let config = SpeculativeConfig {
            max_tokens: 10,
            ..test_config()
        };
        let reputation = Arc::new(ReputationLedger::open_in_memory().unwrap());
        let golden_ticket = Arc::new(GoldenTicketEngine::new(GoldenTicketEngineConfig {
            injection_rate: 0.0,
            ..GoldenTicketEngineConfig::default()
        }));
        let checkpoint = Arc::new(CheckpointManager::new(8, 256));
        let hooks = Arc::new(RecordingHooks::default());
        let stream = speculative_generate(
            engine,
            cp,
            reputation,
            golden_ticket,
            checkpoint,
            hooks.clone(),
            "req-mismatch".to_string(),
            vec![1, 2],
            config,
            CancellationToken::new(),
        );
        tokio::pin!(stream);
        let mut pieces = Vec::new();
        while let Some(piece) = stream.next().await {
            pieces.push(piece.unwrap());
        }
        // "A","B" accepted, engine's true "C" emitted as the correction
        // instead of the draft's "X"; the draft contributes no 4th token.
        assert_eq!(pieces, vec!["L0", "A", "B", "C"]);

        // §8 scenario 3: accepted_tokens counts only the matched prefix (2),
        // never the correction token itself.
        let events = hooks.scout_events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].accepted_tokens, 2);
        assert_eq!(events[0].draft_tokens, 3);
        assert_eq!(events[0].reason, "corrected");
    }

    #[tokio::test]
    async fn golden_ticket_honest_scout_is_never_banned() {
        let engine: Arc<dyn EngineBinding> = Arc::new(FakeEngine::new(&["L0"]));
        let cp: Arc<dyn ControlPlane> = Arc::new(FakeControlPlane::empty());
        let reputation = Arc::new(ReputationLedger::open_in_memory().unwrap());
        let golden_ticket = Arc::new(GoldenTicketEngine::new(GoldenTicketEngineConfig {
            injection_rate: 1.0,
            ..GoldenTicketEngineConfig::default()
        }));
        let ctx = golden_ticket.maybe_inject("req-x", "ignored".to_string());
        let BroadcastContext::Ticket(ticket) = ctx else {
            panic!("injection_rate=1.0 must inject");
        };
        let verdict = golden_ticket.verify("req-x", "honest-scout", &ticket.expected_answer, &reputation);
        assert_eq!(verdict, Some(true));
        let rep = reputation.get("honest-scout").unwrap();
        assert_eq!((rep.attempts, rep.correct), (1, 1));
        assert!(!reputation.is_banned("honest-scout"));
        let _ = (engine, cp);
    }

    #[tokio::test]
    async fn golden_ticket_dishonest_scout_is_banned_after_three() {
        let reputation = Arc::new(ReputationLedger::open_in_memory().unwrap());
        let golden_ticket = Arc::new(GoldenTicketEngine::new(GoldenTicketEngineConfig {
            injection_rate: 1.0,
            ..GoldenTicketEngineConfig::default()
        }));
        for i in 0..3 {
            let request_id = format!("req-{i}");
            let ctx = golden_ticket.maybe_inject(&request_id, "ignored".to_string());
            let BroadcastContext::Ticket(_) = ctx else {
                panic!("injection_rate=1.0 must inject");
            };
            let verdict = golden_ticket.verify(&request_id, "dishonest-scout", "definitely wrong", &reputation);
            assert_eq!(verdict, Some(false));
        }
        let rep = reputation.get("dishonest-scout").unwrap();
        assert_eq!((rep.attempts, rep.correct), (3, 0));
        assert!(reputation.is_banned("dishonest-scout"));
    }

    #[tokio::test]
    async fn hard_timeout_disables_remote_drafts_for_rest_of_request() {
        let engine: Arc<dyn EngineBinding> = Arc::new(FakeEngine::new(&["a", "b", "c", "d", "e"]));
        let cp = Arc::new(FakeControlPlane::timing_out());
        let cp_dyn: Arc<dyn ControlPlane> = cp.clone();
        let config = SpeculativeConfig {
            max_tokens: 5,
            scout_timeout: Duration::from_millis(5),
            ..test_config()
        };
        let (pieces, _, _) = collect(engine, cp_dyn, config).await;
        assert_eq!(pieces, vec!["a", "b", "c", "d", "e"]);
        // Only the first poll should have actually run; once it times out,
        // `remote_disabled` must keep every later iteration from polling again.
        assert_eq!(cp.poll_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn banned_scout_draft_is_dropped_untouched() {
        let engine: Arc<dyn EngineBinding> = Arc::new(FakeEngine::new(&["L0", "A", "B", "C"]));
        let cp: Arc<dyn ControlPlane> = Arc::new(FakeControlPlane::with_draft(DraftResult {
            work_id: "w1".to_string(),
            scout_id: "bad-scout".to_string(),
            draft_tokens: vec!["A".to_string()],
            draft_text: None,
        }));
        let reputation = Arc::new(ReputationLedger::open_in_memory().unwrap());
        reputation.ban("bad-scout", "test", 24.0, 5);
        let golden_ticket = Arc::new(GoldenTicketEngine::new(GoldenTicketEngineConfig {
            injection_rate: 0.0,
            ..GoldenTicketEngineConfig::default()
        }));
        let checkpoint = Arc::new(CheckpointManager::new(8, 256));
        let config = SpeculativeConfig {
            max_tokens: 2,
            ..test_config()
        };
        let stream = speculative_generate(
            engine,
            cp,
            reputation,
            golden_ticket,
            checkpoint,
            Arc::new(NoopHooks),
            "req-banned".to_string(),
            vec![1],
            config,
            CancellationToken::new(),
        );
        tokio::pin!(stream);
        let mut out = Vec::new();
        while let Some(piece) = stream.next().await {
            out.push(piece.unwrap());
        }
        // The draft's "A" never appears — only the two local-step tokens do.
        assert_eq!(out, vec!["L0", "A"]);
    }
}
