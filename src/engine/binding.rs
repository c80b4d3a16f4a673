//! The engine-binding trait.
//!
//! Expressed as a trait, not just the concrete `EngineHandle`, so the
//! speculative loop can be driven in tests against a fake that needs no
//! model weights — mirrors the teacher's habit of testing orchestration logic
//! against plain mock structs (`tests/integration/basic_inference.rs`).

use futures::future::BoxFuture;

use crate::engine::TokenId;
use crate::errors::Result;

/// One native engine handle, owned by exactly one request for its lifetime.
/// Implementations are not `Sync` over concurrent callers of the *same*
/// handle — nothing here promises two in-flight calls on one handle are
/// safe, only that the handle itself can be held behind an `Arc`/moved
/// across an await point.
pub trait EngineBinding: Send + Sync {
    /// Size of the logits buffer that makes `argmax` correct. Passing a
    /// smaller "top-k hint" and argmaxing over it silently truncates the
    /// vocabulary considered; every call site in this crate must use the
    /// full vocabulary.
    fn vocab_size(&self) -> usize;

    /// Tokenizes free text. May prepend a model-specific BOS marker; callers
    /// that already hold a tokenized role header strip it themselves.
    fn tokenize<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<TokenId>>>;

    /// Decodes a single token id to its UTF-8 (lossy) piece.
    fn piece(&self, id: TokenId) -> BoxFuture<'_, Result<String>>;

    /// Appends `ids` to the handle's KV cache. Not idempotent: each call
    /// advances the internal cache position by `ids.len()`.
    fn eval<'a>(&'a self, ids: &'a [TokenId]) -> BoxFuture<'a, Result<()>>;

    /// Reads the full-vocabulary logits at the current cache position and
    /// returns the argmax token id together with its decoded piece. This is
    /// the engine's notion of ground truth — no sampling, ever.
    fn argmax(&self) -> BoxFuture<'_, Result<(TokenId, String)>>;

    /// Truncates the cache by `min(k, pos)` positions. Idempotent past zero.
    /// Returns the new cache position.
    fn rollback(&self, k: u32) -> BoxFuture<'_, Result<u32>>;

    /// Exports the current cache state as `(n_past, opaque payload)`.
    fn snapshot_export(&self) -> BoxFuture<'_, Result<(u32, Vec<u8>)>>;

    /// Restores a previously exported cache state. All-or-nothing: on
    /// failure the handle's cache position is left unspecified and the
    /// session should be abandoned.
    fn snapshot_import<'a>(&'a self, n_past: u32, payload: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Current cache position (count of tokens committed via `eval`/restore).
    fn position(&self) -> u32;

    /// Whether `id` is one of the model's end-of-generation markers. The
    /// local step in the speculative loop terminates the sequence on this.
    fn is_eog(&self, id: TokenId) -> bool;
}
