// HTTP handlers: version, status, capture workflow, telemetry lookup

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::atomic::Ordering;

use super::AppState;
use crate::aggregator::CaptureError;
use crate::models::CaptureMode;

/// GET /version: service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/status: channel stats and the current view (null before the aggregator starts).
pub(super) async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let bridge = &state.bridge;
    Json(serde_json::json!({
        "scale": bridge.scale().map(|scale| scale.stats()),
        "simulator": bridge.simulator().stats(),
        "telemetryEnabled": bridge.telemetry().is_some(),
        "wsClients": state.ws_connections.load(Ordering::Relaxed),
        "weight": bridge.aggregator().map(|aggregator| aggregator.current()),
    }))
}

fn capture_error_response(e: CaptureError) -> Response {
    let status = match e {
        CaptureError::SourceConnected | CaptureError::NotManual => StatusCode::CONFLICT,
        CaptureError::GrossRequired | CaptureError::InvalidWeight => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        CaptureError::ServiceStopped => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

#[derive(Debug, Deserialize)]
pub(super) struct StartCaptureRequest {
    mode: CaptureMode,
}

/// POST /api/capture/start: arms gross or tare capture (`none` cancels).
pub(super) async fn start_capture_handler(
    State(state): State<AppState>,
    Json(request): Json<StartCaptureRequest>,
) -> Response {
    let aggregator = state.bridge.ensure_started().await;
    match aggregator.start_capture(request.mode).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => capture_error_response(e),
    }
}

/// POST /api/capture/now: records the current weight if it is stable.
pub(super) async fn capture_now_handler(State(state): State<AppState>) -> Response {
    let aggregator = state.bridge.ensure_started().await;
    match aggregator.capture_now().await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => capture_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ManualCaptureRequest {
    weight: f64,
}

/// POST /api/capture/manual: typed-in weight while no scale is connected.
pub(super) async fn manual_capture_handler(
    State(state): State<AppState>,
    Json(request): Json<ManualCaptureRequest>,
) -> Response {
    let aggregator = state.bridge.ensure_started().await;
    match aggregator.submit_manual(request.weight).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => capture_error_response(e),
    }
}

/// POST /api/capture/reset: clears the ticket.
pub(super) async fn reset_capture_handler(State(state): State<AppState>) -> Response {
    let aggregator = state.bridge.ensure_started().await;
    match aggregator.reset().await {
        Ok(view) => Json(view).into_response(),
        Err(e) => capture_error_response(e),
    }
}

/// POST /api/scale/reconnect: reopens the local scale for the unified view.
pub(super) async fn reconnect_scale_handler(State(state): State<AppState>) -> Response {
    if state.bridge.scale().is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "scale is disabled" })),
        )
            .into_response();
    }
    let aggregator = state.bridge.ensure_started().await;
    match aggregator.reconnect_local().await {
        Ok(view) => Json(view).into_response(),
        Err(e) => capture_error_response(e),
    }
}

/// GET /api/telemetry/latest: latest remote weight over REST.
pub(super) async fn telemetry_latest_handler(State(state): State<AppState>) -> Response {
    let Some(client) = state.bridge.telemetry() else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "telemetry is disabled" })),
        )
            .into_response();
    };
    let entity = state.bridge.telemetry_entity();
    let result = async {
        let login = client.login().await?;
        client.latest_weight(&login.token, &entity).await
    }
    .await;
    match result {
        Ok(weight) => Json(serde_json::json!({
            "entityType": entity.entity_type,
            "entityId": entity.entity_id,
            "weight": weight,
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, operation = "telemetry_latest", "telemetry lookup failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
