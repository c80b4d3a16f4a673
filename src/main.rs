//! Shard: OpenAI-compatible speculative-decoding inference server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shard_engine::api::{build_router, scout::WorkQueue, AppState};
use shard_engine::config::ShardConfig;
use shard_engine::control_plane::ControlPlaneClient;
use shard_engine::golden_ticket::{GoldenTicketEngine, GoldenTicketEngineConfig};
use shard_engine::metrics::create_metrics;
use shard_engine::model::{ModelConfig, ModelLoader, ModelManager};
use shard_engine::reputation::ReputationLedger;
use shard_engine::speculative::SpeculativeConfig;
use shard_engine::utils::RateLimiter;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("shard_engine=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting shard-engine v{}", env!("CARGO_PKG_VERSION"));

    let config = ShardConfig::load();
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("config error: {e}");
        }
        std::process::exit(1);
    }

    if config.server.host == "0.0.0.0" {
        warn!("server will accept connections from the LAN (0.0.0.0) — ensure your firewall is configured");
    }

    let model_config = ModelConfig::new(config.model.path.to_string_lossy().to_string())
        .with_threads(config.model.threads)
        .with_gpu_layers(config.model.gpu_layers)
        .with_context_size(config.model.n_ctx)
        .with_batch_size(config.model.n_batch)
        .with_mmap(config.model.use_mmap)
        .with_mlock(config.model.use_mlock)
        .with_kv_cache_quant(config.model.kv_cache_type);

    let loader = ModelLoader::new(model_config.clone());
    if let Err(e) = loader.validate() {
        error!("model validation failed: {e}");
        error!("set SHARD_MODEL_PATH to point at a valid .gguf file");
        std::process::exit(1);
    }

    let model_name = config
        .model
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("shard-model")
        .to_string();

    let model_manager =
        match ModelManager::load(model_name.clone(), config.model.path.clone(), model_config) {
            Ok(manager) => Arc::new(manager),
            Err(e) => {
                error!("failed to load model: {e}");
                std::process::exit(1);
            }
        };
    info!(model = %model_name, "model loaded");

    let reputation = match &config.golden_ticket.reputation_db_path {
        Some(path) => ReputationLedger::open(path),
        None => ReputationLedger::open_in_memory(),
    };
    let reputation = Arc::new(reputation.unwrap_or_else(|e| {
        error!("failed to open reputation ledger: {e}");
        std::process::exit(1);
    }));

    let golden_ticket = Arc::new(GoldenTicketEngine::new(GoldenTicketEngineConfig {
        injection_rate: config.golden_ticket.injection_rate,
        reputation_threshold: config.golden_ticket.reputation_threshold,
        min_attempts_before_ban: config.golden_ticket.min_attempts_before_ban,
        ban_duration_hours: config.golden_ticket.ban_duration_hours,
    }));

    let control_plane = Arc::new(ControlPlaneClient::new(
        config.control_plane.base_url.clone(),
        Duration::from_millis(config.control_plane.broadcast_timeout_ms),
    ));

    let metrics = create_metrics();
    let work_queue = Arc::new(WorkQueue::new());

    let speculative_config = SpeculativeConfig {
        max_tokens: 256,
        scout_timeout: Duration::from_millis(config.control_plane.scout_result_timeout_ms),
        ..SpeculativeConfig::default()
    };

    let app_state = AppState {
        model_manager,
        reputation,
        golden_ticket,
        control_plane,
        work_queue,
        metrics,
        speculative_config,
        checkpoint_every_n_tokens: config.checkpoint.every_n_tokens,
        checkpoint_tail_len: config.checkpoint.tail_len,
        start_time: std::time::Instant::now(),
    };

    let mut app = build_router(app_state);

    if config.server.cors_enabled {
        warn!("CORS enabled — allowing cross-origin requests");
        app = app.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));
    }

    if config.server.rate_limit.enabled {
        use axum::middleware;
        use shard_engine::utils::rate_limit::rate_limit_middleware;

        let rate_limiter = RateLimiter::new(
            config.server.rate_limit.max_requests,
            config.server.rate_limit.window_secs,
        );

        app = app.layer(middleware::from_fn_with_state(
            rate_limiter.clone(),
            rate_limit_middleware,
        ));

        let window = Duration::from_secs(config.server.rate_limit.window_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(window);
            loop {
                interval.tick().await;
                rate_limiter.cleanup().await;
            }
        });
    }

    app = app.layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let socket_addr: SocketAddr = addr.parse().unwrap_or_else(|e| {
        error!("invalid socket address '{addr}': {e}");
        std::process::exit(1);
    });

    let listener = match tokio::net::TcpListener::bind(&socket_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind to {socket_addr}: {e}");
            std::process::exit(1);
        }
    };

    info!("listening on http://{socket_addr}");
    info!("  POST /v1/chat/completions");
    info!("  GET  /v1/models");
    info!("  GET  /health");
    info!("  GET  /metrics");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("server error: {e}");
        std::process::exit(1);
    }

    info!("server shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!("failed to install signal handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C signal"),
        _ = terminate => info!("received terminate signal"),
    }

    info!("initiating graceful shutdown...");
}
