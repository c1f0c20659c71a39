use std::time::Duration;

use tokio_util::sync::CancellationToken;

use playback_engine::PlaybackRegistry;

use crate::backend::build_context;
use crate::config::{ServeArgs, ServerConfig};
use crate::error::ServerError;

const API_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("playback-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");
    let defaults = config.defaults.window()?;

    // --- Broker context + registry ---
    let broker = build_context(&config.source, &config.target)?;
    let registry = PlaybackRegistry::new(broker, config.playback.clone());
    tracing::info!(
        grace_ms = config.playback.grace_period_ms,
        order = ?config.playback.order,
        decode_failure = ?config.playback.decode_failure,
        "playback registry ready"
    );

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    // --- API server ---
    let api_registry = registry.clone();
    let api_port = config.api_port;
    let api_token = token.clone();
    let mut api_handle = tokio::spawn(async move {
        if let Err(e) = playback_api_server::run(api_port, api_registry, defaults, api_token).await {
            tracing::error!(error = %e, "api server error");
        }
    });

    tracing::info!("server ready");

    // --- Ожидание Ctrl+C (или падения API) ---
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down...");
        }
        _ = &mut api_handle => {
            tracing::warn!("api server exited, shutting down");
        }
    }

    token.cancel();
    // shutdown ждёт flush'а producer'ов
    if let Err(e) = tokio::task::spawn_blocking(move || registry.shutdown()).await {
        tracing::error!(error = %e, "registry shutdown task failed");
    }

    if !api_handle.is_finished() {
        match tokio::time::timeout(API_DRAIN_TIMEOUT, &mut api_handle).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!("api server did not drain in time, aborting");
                api_handle.abort();
            }
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}
