//! OpenAI-compatible chat completions handler, backed by the speculative loop.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::openai::{ChatCompletionChunk, ChatCompletionRequest};
use crate::api::schema::AppState;
use crate::checkpoint::CheckpointManager;
use crate::control_plane::ControlPlane;
use crate::engine::{EngineBinding, EngineHandle};
use crate::errors::{Result, ShardError};
use crate::golden_ticket::new_request_id;
use crate::inference::{apply_chat_template, TemplateType};
use crate::metrics::MetricsHooks;
use crate::speculative::speculative_generate;

/// `POST /v1/chat/completions`. Always streams — OpenAI's `stream=false`
/// shape would just mean buffering the whole speculative run server-side for
/// no benefit here, so every client gets SSE.
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    if request.messages.is_empty() {
        return Err(ShardError::InvalidParameters(
            "messages cannot be empty".to_string(),
        ));
    }

    state.metrics.chat_request();
    info!(model = %request.model, max_tokens = request.max_tokens, "chat completion request");

    let template_type = TemplateType::from_model_name(&request.model);
    let formatted_prompt = apply_chat_template(&request.messages, template_type);

    let model = state.model_manager.model();
    let backend = state.model_manager.backend();
    let engine = EngineHandle::spawn(model, backend, state.model_manager.config().clone())
        .await
        .map_err(|e| {
            state.metrics.chat_failure();
            e
        })?;
    let prompt_tokens = engine.tokenize(&formatted_prompt).await?;
    let engine: Arc<dyn EngineBinding> = Arc::new(engine);

    let checkpoint = Arc::new(CheckpointManager::new(
        state.checkpoint_every_n_tokens,
        state.checkpoint_tail_len,
    ));
    let control_plane: Arc<dyn ControlPlane> = state.control_plane.clone();

    let request_id = new_request_id();
    let model_name = request.model.clone();
    let response_id = format!("chatcmpl-{request_id}");
    let mut speculative_config = state.speculative_config.clone();
    speculative_config.max_tokens = request.max_tokens;

    let token_stream = speculative_generate(
        engine,
        control_plane,
        state.reputation.clone(),
        state.golden_ticket.clone(),
        checkpoint,
        Arc::new(MetricsHooks::new(state.metrics.clone())),
        request_id,
        prompt_tokens,
        speculative_config,
        CancellationToken::new(),
    );

    let metrics = state.metrics.clone();
    let mut is_first_chunk = true;
    let sse_stream = token_stream.map(move |result| {
        let chunk = match result {
            Ok(piece) => {
                let chunk = ChatCompletionChunk::new(
                    response_id.clone(),
                    model_name.clone(),
                    Some(piece),
                    None,
                    is_first_chunk,
                );
                is_first_chunk = false;
                chunk
            }
            Err(e) => {
                error!("speculative loop error: {e}");
                metrics.chat_failure();
                ChatCompletionChunk::new(
                    response_id.clone(),
                    model_name.clone(),
                    None,
                    Some("error".to_string()),
                    is_first_chunk,
                )
            }
        };

        let json = serde_json::to_string(&chunk).unwrap_or_else(|e| {
            error!("failed to serialize chunk: {e}");
            "{}".to_string()
        });

        Ok(Event::default().data(json))
    });

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}
