mod http;
mod time;

use axum::Router;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;

use playback_engine::PlaybackRegistry;

pub use time::{WindowDefaults, parse_time};

#[derive(Clone)]
pub(crate) struct AppState {
    registry: PlaybackRegistry,
    defaults: WindowDefaults,
}

/// Маршруты playback API.
///
/// `GET /playbacks/{id}` останавливает playback так же, как `DELETE`:
/// его используют старые клиенты.
pub fn router(registry: PlaybackRegistry, defaults: WindowDefaults) -> Router {
    let state = AppState { registry, defaults };

    Router::new()
        .route("/playbacks", post(http::handle_start).get(http::handle_list))
        .route(
            "/playbacks/{id}",
            get(http::handle_stop).delete(http::handle_stop),
        )
        .with_state(state)
}

/// HTTP API сервер. Завершается по `shutdown`.
pub async fn run(
    port: u16,
    registry: PlaybackRegistry,
    defaults: WindowDefaults,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let app = router(registry, defaults);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind api :{port}: {e}"))?;
    tracing::info!(port, "playback API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))?;

    Ok(())
}
