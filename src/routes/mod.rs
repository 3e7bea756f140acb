// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tower_http::cors::{Any, CorsLayer};

use crate::bridge::{Bridge, SCALE_CHANNEL, SIMULATOR_CHANNEL};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) bridge: Arc<Bridge>,
    pub(crate) ws_connections: Arc<AtomicUsize>,
}

pub fn app(bridge: Arc<Bridge>) -> Router {
    let state = AppState {
        bridge,
        ws_connections: Arc::new(AtomicUsize::new(0)),
    };
    Router::new()
        .route("/", get(|| async { "weighbridge: live weight readings" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/status", get(http::status_handler)) // GET /api/status
        .route(SCALE_CHANNEL, get(ws::ws_scale)) // WS /api/scale
        .route(SIMULATOR_CHANNEL, get(ws::ws_simulator)) // WS /api/websocket
        .route("/ws/weight", get(ws::ws_weight)) // WS /ws/weight
        .route("/api/capture/start", post(http::start_capture_handler))
        .route("/api/capture/now", post(http::capture_now_handler))
        .route("/api/capture/manual", post(http::manual_capture_handler))
        .route("/api/capture/reset", post(http::reset_capture_handler))
        .route("/api/scale/reconnect", post(http::reconnect_scale_handler))
        .route("/api/telemetry/latest", get(http::telemetry_latest_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any))
        .with_state(state)
}
