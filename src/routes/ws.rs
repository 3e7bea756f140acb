// WebSocket handlers and stream logic

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::models::{WeightView, WireEvent};
use crate::scale_channel::{ChannelHandle, LocalScaleChannel};

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Decrements the WebSocket connection count on drop (connect = +1, drop = -1).
struct WsConnectionGuard(Arc<AtomicUsize>);

impl WsConnectionGuard {
    fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self(count)
    }
}

impl Drop for WsConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Sends one text frame. `false` means the client is gone or too slow.
async fn send_text(socket: &mut WebSocket, json: String) -> bool {
    let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(json.into()))).await;
    matches!(r, Ok(Ok(())))
}

async fn send_ping(socket: &mut WebSocket) -> bool {
    let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Ping(Bytes::new()))).await;
    matches!(r, Ok(Ok(())))
}

pub(super) async fn ws_scale(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    match state.bridge.scale() {
        Some(channel) => upgrade_channel(ws, channel.clone(), state.ws_connections.clone()),
        None => (StatusCode::NOT_FOUND, "scale channel is disabled").into_response(),
    }
}

pub(super) async fn ws_simulator(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let channel = state.bridge.simulator().clone();
    upgrade_channel(ws, channel, state.ws_connections.clone())
}

fn upgrade_channel(
    ws: WebSocketUpgrade,
    channel: LocalScaleChannel,
    conn_count: Arc<AtomicUsize>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let _guard = WsConnectionGuard::new(conn_count);
        tracing::info!(channel = channel.name(), "client connected to scale stream");
        let mut handle = channel.connect().await;
        if let Err(e) = stream_channel(socket, &mut handle).await {
            tracing::info!(channel = channel.name(), error = %e, "scale stream error");
        }
        // Awaited so the device is closed before the next client can reopen it.
        handle.disconnect().await;
        tracing::info!(channel = channel.name(), "client left scale stream");
    })
}

async fn stream_channel(mut socket: WebSocket, handle: &mut ChannelHandle) -> anyhow::Result<()> {
    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            event = handle.recv() => {
                let Some(event) = event else { break };
                let json = serde_json::to_string(&WireEvent::from(event))?;
                if !send_text(&mut socket, json).await {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = ping_interval.tick() => {
                if !send_ping(&mut socket).await {
                    break;
                }
            }
        }
    }
    Ok(())
}

pub(super) async fn ws_weight(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let bridge = state.bridge.clone();
    let conn_count = state.ws_connections.clone();
    ws.on_upgrade(move |socket| async move {
        let _guard = WsConnectionGuard::new(conn_count);
        let rx = bridge.ensure_started().await.subscribe();
        tracing::info!("client connected to weight view stream");
        if let Err(e) = stream_view(socket, rx).await {
            tracing::info!(error = %e, "weight view stream error");
        }
    })
}

async fn stream_view(
    mut socket: WebSocket,
    mut rx: watch::Receiver<WeightView>,
) -> anyhow::Result<()> {
    let current = rx.borrow_and_update().clone();
    if !send_text(&mut socket, serde_json::to_string(&current)?).await {
        return Ok(());
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = rx.borrow_and_update().clone();
                if !send_text(&mut socket, serde_json::to_string(&view)?).await {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = ping_interval.tick() => {
                if !send_ping(&mut socket).await {
                    break;
                }
            }
        }
    }
    Ok(())
}
