//! Shared model loading (simplified from the teacher's multi-model hot-swap cache).
//!
//! The speculative loop gives every request its own `EngineHandle` (its own
//! mutable KV-cache context); only the read-only weights and the backend are
//! shared across requests. There is exactly one active model per process, so
//! the teacher's LRU cache / hot-swap machinery has no counterpart here —
//! this keeps only what's still needed: load once, hand out cheap `Arc`
//! clones.

use std::path::PathBuf;
use std::sync::Arc;

use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::model::LlamaModel;
use serde::Serialize;

use crate::errors::{Result, ShardError};
use crate::model::config::ModelConfig;

/// Information about the loaded model, exposed over `/v1/models` and `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub load_time_ms: u64,
    pub n_vocab: i32,
    pub n_ctx_max: usize,
}

/// Owns the shared backend and the one active model's weights.
pub struct ModelManager {
    backend: Arc<LlamaBackend>,
    model: Arc<LlamaModel>,
    config: ModelConfig,
    info: ModelInfo,
}

impl ModelManager {
    /// Loads the model synchronously. Call from a blocking context.
    pub fn load(name: String, path: PathBuf, config: ModelConfig) -> Result<Self> {
        let backend = Arc::new(
            LlamaBackend::init()
                .map_err(|e| ShardError::EngineLoadFailed(format!("backend init: {e}")))?,
        );
        Self::load_with_backend(name, path, config, backend)
    }

    pub fn load_with_backend(
        name: String,
        path: PathBuf,
        config: ModelConfig,
        backend: Arc<LlamaBackend>,
    ) -> Result<Self> {
        tracing::info!(model = %name, path = %path.display(), "loading model");
        let start = std::time::Instant::now();

        let model = LlamaModel::load_from_file(&backend, &path, &config.into_params())
            .map_err(|e| ShardError::EngineLoadFailed(format!("failed to load model: {e}")))?;
        let model = Arc::new(model);
        let load_time_ms = start.elapsed().as_millis() as u64;
        let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

        let info = ModelInfo {
            name,
            path,
            size_bytes,
            load_time_ms,
            n_vocab: model.n_vocab(),
            n_ctx_max: config.n_ctx as usize,
        };

        tracing::info!(load_time_ms, n_vocab = info.n_vocab, "model loaded");

        Ok(Self {
            backend,
            model,
            config,
            info,
        })
    }

    pub fn model(&self) -> Arc<LlamaModel> {
        self.model.clone()
    }

    pub fn backend(&self) -> Arc<LlamaBackend> {
        self.backend.clone()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }
}
