//! Engine Binding.
//!
//! Wraps the native heavy-model library behind discrete operations —
//! load/free, tokenize, decode piece, eval a token run, read logits, rollback
//! N positions, export/import a KV snapshot — rather than folding them into
//! one monolithic generation loop the way the teacher's old inference engine
//! did. Grounded in that engine's batch-construction and KV bookkeeping,
//! restructured so each request owns its own context.

pub mod binding;
pub mod handle;

pub use binding::EngineBinding;
pub use handle::{EngineHandle, EngineHandleConfig};

/// A vocabulary token id. Kept as a bare `i32` (not `llama_cpp_2::token::LlamaToken`)
/// so the `EngineBinding` trait, and anything built against it, has no hard
/// dependency on the native crate — the speculative loop's tests exercise a
/// fake binding with plain integers.
pub type TokenId = i32;
