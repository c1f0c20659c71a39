use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use playback_engine::{PlaybackError, PlaybackRequest};

use super::AppState;
use crate::time::parse_time;

/// Ошибка API: всегда `400 {"message": ...}`.
pub(crate) struct ApiError(String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "message": self.0 })),
        )
            .into_response()
    }
}

impl From<PlaybackError> for ApiError {
    fn from(e: PlaybackError) -> Self {
        ApiError(e.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════
//  POST /playbacks?sourceTopic=&targetTopic=&speed=&startTime=&endTime=
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartParams {
    #[serde(alias = "hostTopic")]
    source_topic: Option<String>,
    #[serde(alias = "destinationTopic")]
    target_topic: Option<String>,
    #[serde(alias = "playbackSpeed")]
    speed: Option<f64>,
    #[serde(alias = "dateBegin")]
    start_time: Option<String>,
    #[serde(alias = "dateEnd")]
    end_time: Option<String>,
}

pub(crate) async fn handle_start(
    State(state): State<AppState>,
    params: Result<Query<StartParams>, QueryRejection>,
) -> Result<String, ApiError> {
    let Query(params) = params.map_err(|e| ApiError(e.body_text()))?;

    let source_topic = params
        .source_topic
        .ok_or_else(|| ApiError("missing parameter 'sourceTopic'".into()))?;
    let target_topic = params
        .target_topic
        .ok_or_else(|| ApiError("missing parameter 'targetTopic'".into()))?;
    let start_ms = match params.start_time.as_deref() {
        Some(raw) => parse_time(raw).map_err(ApiError)?,
        None => state.defaults.start_ms,
    };
    let end_ms = match params.end_time.as_deref() {
        Some(raw) => parse_time(raw).map_err(ApiError)?,
        None => state.defaults.end_ms,
    };

    let request = PlaybackRequest::new(
        source_topic,
        target_topic,
        params.speed.unwrap_or(1.0),
        start_ms,
        end_ms,
    );
    match state.registry.start(request).await {
        Ok(id) => Ok(id),
        Err(e) => {
            tracing::warn!(error = %e, "playback start rejected");
            Err(e.into())
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  GET /playbacks
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_list(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.list())
}

// ═══════════════════════════════════════════════════════════════
//  DELETE /playbacks/{id}
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_stop(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StatusCode {
    state.registry.stop(&id);
    StatusCode::NO_CONTENT
}
