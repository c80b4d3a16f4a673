//! `EngineHandle`: the production `EngineBinding` over `llama-cpp-2`.
//!
//! One handle owns one dedicated OS thread holding a `LlamaContext` created
//! from the shared, read-only `Arc<LlamaModel>`/`Arc<LlamaBackend>` — weights
//! are shared, the mutable KV cache is not. Commands cross the
//! thread boundary over an unbounded channel with a oneshot reply per call,
//! the same "background thread behind a channel" shape as the teacher's
//! `InferenceEngine::background_loop`, just scoped to a single request
//! instead of serving every request off one shared context.

use std::sync::Arc;

use futures::future::BoxFuture;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::token::LlamaToken;
use tokio::sync::oneshot;
use tracing::warn;

use crate::engine::{binding::EngineBinding, TokenId};
use crate::errors::{Result, ShardError};
use crate::model::ModelConfig;

enum Cmd {
    Tokenize(String, oneshot::Sender<Result<Vec<TokenId>>>),
    Piece(TokenId, oneshot::Sender<Result<String>>),
    Eval(Vec<TokenId>, oneshot::Sender<Result<()>>),
    Argmax(oneshot::Sender<Result<(TokenId, String)>>),
    Rollback(u32, oneshot::Sender<Result<u32>>),
    SnapshotExport(oneshot::Sender<Result<(u32, Vec<u8>)>>),
    SnapshotImport(u32, Vec<u8>, oneshot::Sender<Result<()>>),
}

/// The subset of `ModelConfig` the worker thread needs to build its context.
/// Kept as a thin newtype-free alias rather than re-deriving a struct: the
/// engine binding reuses the model config the shared loader already built.
pub type EngineHandleConfig = ModelConfig;

pub struct EngineHandle {
    cmd_tx: Option<tokio::sync::mpsc::UnboundedSender<Cmd>>,
    worker: Option<std::thread::JoinHandle<()>>,
    // Kept alongside the worker's own clone purely so `is_eog` — a pure,
    // non-cache-mutating property lookup — doesn't need a channel round trip.
    model: Arc<LlamaModel>,
    vocab_size: usize,
    position: std::sync::atomic::AtomicU32,
}

impl EngineHandle {
    /// Spawns the dedicated worker thread and blocks (briefly, on the calling
    /// async task's blocking-safe caller) until the context is ready or
    /// construction fails.
    pub async fn spawn(
        model: Arc<LlamaModel>,
        backend: Arc<LlamaBackend>,
        config: EngineHandleConfig,
    ) -> Result<Self> {
        let vocab_size = model.n_vocab().max(0) as usize;
        let model_for_worker = Arc::clone(&model);
        let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel::<Cmd>();
        let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<(), String>>();

        let worker = std::thread::Builder::new()
            .name("shard-engine-handle".to_string())
            .spawn(move || Self::worker_loop(model_for_worker, backend, config, cmd_rx, ready_tx))
            .map_err(|e| ShardError::EngineLoadFailed(format!("spawn failed: {e}")))?;

        ready_rx
            .await
            .map_err(|_| ShardError::EngineLoadFailed("worker thread exited before ready".into()))?
            .map_err(ShardError::EngineLoadFailed)?;

        Ok(Self {
            cmd_tx: Some(cmd_tx),
            worker: Some(worker),
            model,
            vocab_size,
            position: std::sync::atomic::AtomicU32::new(0),
        })
    }

    fn worker_loop(
        model: Arc<LlamaModel>,
        backend: Arc<LlamaBackend>,
        config: EngineHandleConfig,
        mut cmd_rx: tokio::sync::mpsc::UnboundedReceiver<Cmd>,
        ready_tx: oneshot::Sender<std::result::Result<(), String>>,
    ) {
        let n_threads = config.n_threads as i32;
        let ctx_params = config
            .into_context_params()
            .with_n_threads(n_threads)
            .with_n_threads_batch(n_threads);

        let mut ctx = match model.new_context(&backend, ctx_params) {
            Ok(ctx) => {
                let _ = ready_tx.send(Ok(()));
                ctx
            }
            Err(e) => {
                let _ = ready_tx.send(Err(format!("context creation failed: {e}")));
                return;
            }
        };

        let mut batch = LlamaBatch::new(config.n_batch as usize, 1);
        let mut pos: i32 = 0;

        while let Some(cmd) = cmd_rx.blocking_recv() {
            match cmd {
                Cmd::Tokenize(text, reply) => {
                    let result = model
                        .str_to_token(&text, AddBos::Always)
                        .map(|toks| toks.into_iter().map(|t| t.0).collect())
                        .map_err(|e| ShardError::EngineEvalFailed(format!("tokenize: {e}")));
                    let _ = reply.send(result);
                }
                Cmd::Piece(id, reply) => {
                    let result = model
                        .token_to_str(LlamaToken(id), Special::Tokenize)
                        .map_err(|e| ShardError::EngineEvalFailed(format!("piece: {e}")));
                    let _ = reply.send(result);
                }
                Cmd::Eval(ids, reply) => {
                    let result = Self::run_eval(&mut ctx, &mut batch, &mut pos, &ids);
                    let _ = reply.send(result);
                }
                Cmd::Argmax(reply) => {
                    let result = Self::run_argmax(&ctx, &model);
                    let _ = reply.send(result);
                }
                Cmd::Rollback(k, reply) => {
                    let result = Self::run_rollback(&mut ctx, &mut pos, k);
                    let _ = reply.send(result);
                }
                Cmd::SnapshotExport(reply) => {
                    let result = Self::run_snapshot_export(&ctx, pos);
                    let _ = reply.send(result);
                }
                Cmd::SnapshotImport(n_past, payload, reply) => {
                    let result = Self::run_snapshot_import(&mut ctx, &mut pos, n_past, &payload);
                    let _ = reply.send(result);
                }
            }
        }
    }

    fn run_eval(
        ctx: &mut llama_cpp_2::context::LlamaContext,
        batch: &mut LlamaBatch,
        pos: &mut i32,
        ids: &[TokenId],
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let last_idx = ids.len() - 1;
        batch.clear();
        for (offset, &id) in ids.iter().enumerate() {
            let is_last = offset == last_idx;
            batch
                .add(LlamaToken(id), *pos + offset as i32, &[0], is_last)
                .map_err(|e| ShardError::EngineEvalFailed(format!("batch add: {e}")))?;
        }
        ctx.decode(batch)
            .map_err(|e| ShardError::EngineEvalFailed(format!("decode: {e}")))?;
        *pos += ids.len() as i32;
        Ok(())
    }

    fn run_argmax(
        ctx: &llama_cpp_2::context::LlamaContext,
        model: &LlamaModel,
    ) -> Result<(TokenId, String)> {
        // -1 resolves to the last position for which logits were requested,
        // the same convention `LlamaSampler::sample(ctx, -1)` relies on
        // elsewhere in this crate's older engine. We read raw logits instead
        // of going through a sampler chain so this is a true argmax over the
        // full vocabulary, never a top-k prefix.
        let logits = ctx
            .get_logits_ith(-1)
            .map_err(|e| ShardError::LogitsUnavailable(format!("logits read failed: {e}")))?;
        if logits.is_empty() {
            return Err(ShardError::LogitsUnavailable(
                "engine returned zero logits".to_string(),
            ));
        }

        let token = LlamaToken(argmax_index(logits) as i32);
        let piece = model
            .token_to_str(token, Special::Tokenize)
            .unwrap_or_default();
        Ok((token.0, piece))
    }

    fn run_rollback(
        ctx: &mut llama_cpp_2::context::LlamaContext,
        pos: &mut i32,
        k: u32,
    ) -> Result<u32> {
        let current = (*pos).max(0) as u32;
        let new_pos = current.saturating_sub(k);
        if new_pos < current {
            if let Err(e) = ctx.clear_kv_cache_seq(Some(0), Some(new_pos), Some(current)) {
                warn!("rollback clear_kv_cache_seq failed, forcing full clear: {e}");
                ctx.clear_kv_cache();
                *pos = 0;
                return Ok(0);
            }
        }
        *pos = new_pos as i32;
        Ok(new_pos)
    }

    fn run_snapshot_export(
        ctx: &llama_cpp_2::context::LlamaContext,
        pos: i32,
    ) -> Result<(u32, Vec<u8>)> {
        let payload = ctx
            .get_state_data()
            .map_err(|e| ShardError::SnapshotInvalid(format!("state export failed: {e}")))?;
        Ok((pos.max(0) as u32, payload))
    }

    fn run_snapshot_import(
        ctx: &mut llama_cpp_2::context::LlamaContext,
        pos: &mut i32,
        n_past: u32,
        payload: &[u8],
    ) -> Result<()> {
        ctx.set_state_data(payload)
            .map_err(|e| ShardError::SnapshotInvalid(format!("state import failed: {e}")))?;
        *pos = n_past as i32;
        Ok(())
    }

    async fn call<T, F>(&self, make_cmd: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<Result<T>>) -> Cmd,
    {
        let (tx, rx) = oneshot::channel();
        let cmd_tx = self
            .cmd_tx
            .as_ref()
            .ok_or_else(|| ShardError::InternalError("engine handle already shut down".to_string()))?;
        cmd_tx
            .send(make_cmd(tx))
            .map_err(|_| ShardError::InternalError("engine worker thread is gone".to_string()))?;
        rx.await
            .map_err(|_| ShardError::InternalError("engine worker dropped reply".to_string()))?
    }
}

impl EngineBinding for EngineHandle {
    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn tokenize<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<TokenId>>> {
        let text = text.to_string();
        Box::pin(async move { self.call(|tx| Cmd::Tokenize(text, tx)).await })
    }

    fn piece(&self, id: TokenId) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move { self.call(|tx| Cmd::Piece(id, tx)).await })
    }

    fn eval<'a>(&'a self, ids: &'a [TokenId]) -> BoxFuture<'a, Result<()>> {
        let ids = ids.to_vec();
        Box::pin(async move {
            let result = self.call(|tx| Cmd::Eval(ids.clone(), tx)).await;
            if result.is_ok() {
                self.position
                    .fetch_add(ids.len() as u32, std::sync::atomic::Ordering::Relaxed);
            }
            result
        })
    }

    fn argmax(&self) -> BoxFuture<'_, Result<(TokenId, String)>> {
        // Reading logits is a pure read at the current cache position; the
        // position only advances once the chosen token is committed via `eval`.
        Box::pin(async move { self.call(Cmd::Argmax).await })
    }

    fn rollback(&self, k: u32) -> BoxFuture<'_, Result<u32>> {
        Box::pin(async move {
            let new_pos = self.call(|tx| Cmd::Rollback(k, tx)).await?;
            self.position
                .store(new_pos, std::sync::atomic::Ordering::Relaxed);
            Ok(new_pos)
        })
    }

    fn snapshot_export(&self) -> BoxFuture<'_, Result<(u32, Vec<u8>)>> {
        Box::pin(async move { self.call(Cmd::SnapshotExport).await })
    }

    fn snapshot_import<'a>(
        &'a self,
        n_past: u32,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<()>> {
        let payload = payload.to_vec();
        Box::pin(async move {
            let result = self
                .call(|tx| Cmd::SnapshotImport(n_past, payload, tx))
                .await;
            if result.is_ok() {
                self.position
                    .store(n_past, std::sync::atomic::Ordering::Relaxed);
            }
            result
        })
    }

    fn position(&self) -> u32 {
        self.position.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn is_eog(&self, id: TokenId) -> bool {
        self.model.is_eog_token(LlamaToken(id))
    }
}

/// Index of the largest logit. A bare linear scan, deliberately not routed
/// through a `LlamaSampler` chain — argmax-over-top-k silently drops
/// low-ranked but still-possible tokens, so this always runs over the full
/// vocabulary slice.
fn argmax_index(logits: &[f32]) -> usize {
    let mut best_idx = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in logits.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = i;
        }
    }
    best_idx
}

#[cfg(test)]
mod tests {
    use super::argmax_index;

    #[test]
    fn argmax_picks_largest_even_when_negative() {
        assert_eq!(argmax_index(&[-5.0, -1.0, -3.0]), 1);
    }

    #[test]
    fn argmax_picks_first_of_ties() {
        assert_eq!(argmax_index(&[2.0, 2.0, 1.0]), 0);
    }

    #[test]
    fn argmax_single_element() {
        assert_eq!(argmax_index(&[0.0]), 0);
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        // Drop the sender first so the worker's `blocking_recv` observes
        // channel closure and exits before we join it.
        self.cmd_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
