// Remote telemetry channel: login, subscribe over WebSocket, relay `weight`
// pushes as channel events. A supervising loop owns all retries.

use super::backoff::{Backoff, BackoffConfig};
use super::client::TelemetryClient;
use super::protocol::{self, EntityRef};
use super::TelemetryError;
use crate::models::{ChannelEvent, WeightUpdate};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
pub struct RemoteChannelConfig {
    pub ws_url: String,
    pub entity: EntityRef,
    pub retry: BackoffConfig,
    pub capacity: usize,
}

/// Why a session ended, as seen by the supervising loop.
enum SessionEnd {
    /// Consumer is gone; stop without retrying.
    ConsumerGone,
    Failed(TelemetryError),
}

impl From<TelemetryError> for SessionEnd {
    fn from(e: TelemetryError) -> Self {
        SessionEnd::Failed(e)
    }
}

/// Owner of a running remote channel. Dropping it stops the channel.
pub struct RemoteHandle {
    events: mpsc::Receiver<ChannelEvent>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RemoteHandle {
    /// Next event in arrival order. `None` once the channel has given up or stopped.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Cancels any pending retry and closes the socket, then waits for the task.
    pub async fn shutdown(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "telemetry task failed");
        }
    }
}

impl Drop for RemoteHandle {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

pub fn spawn(config: RemoteChannelConfig, client: TelemetryClient) -> RemoteHandle {
    let (events_tx, events) = mpsc::channel(config.capacity.max(1));
    let (stop_tx, stop_rx) = oneshot::channel();
    let task = tokio::spawn(run(config, client, events_tx, stop_rx));
    RemoteHandle {
        events,
        stop_tx: Some(stop_tx),
        task: Some(task),
    }
}

#[tracing::instrument(skip_all, fields(entity_id = %config.entity.entity_id))]
async fn run(
    config: RemoteChannelConfig,
    client: TelemetryClient,
    events: mpsc::Sender<ChannelEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut backoff = Backoff::new(config.retry);
    loop {
        let mut connected = false;
        let end = tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            end = run_session(&config, &client, &events, &mut backoff, &mut connected) => end,
        };
        let error = match end {
            SessionEnd::ConsumerGone => break,
            SessionEnd::Failed(e) => e,
        };

        tracing::warn!(error = %error, was_connected = connected, "telemetry session ended");
        if connected
            && events
                .send(ChannelEvent::ConnectionStateChanged { connected: false })
                .await
                .is_err()
        {
            break;
        }
        let message = if connected {
            error.to_string()
        } else {
            format!("failed to connect to telemetry: {error}")
        };
        if events.send(ChannelEvent::error(message)).await.is_err() {
            break;
        }

        let Some(delay) = backoff.next_delay() else {
            let attempts = backoff.attempts();
            tracing::warn!(attempts, "telemetry retries exhausted; giving up");
            let _ = events
                .send(ChannelEvent::error(format!(
                    "telemetry unavailable: giving up after {attempts} retries"
                )))
                .await;
            break;
        };
        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            attempt = backoff.attempts(),
            "telemetry reconnect scheduled"
        );
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    tracing::debug!("telemetry channel stopped");
}

/// One login + subscribe + read cycle. Never retries on its own.
async fn run_session(
    config: &RemoteChannelConfig,
    client: &TelemetryClient,
    events: &mpsc::Sender<ChannelEvent>,
    backoff: &mut Backoff,
    connected: &mut bool,
) -> SessionEnd {
    let login = match client.login().await {
        Ok(login) => login,
        Err(e) => return e.into(),
    };
    let (mut socket, _) = match tokio_tungstenite::connect_async(config.ws_url.as_str()).await {
        Ok(pair) => pair,
        Err(e) => return TelemetryError::Socket(e.to_string()).into(),
    };
    let hello = match protocol::subscribe_message(&login.token, &config.entity) {
        Ok(hello) => hello,
        Err(e) => return e.into(),
    };
    if let Err(e) = socket.send(Message::text(hello)).await {
        return TelemetryError::Socket(e.to_string()).into();
    }

    *connected = true;
    backoff.reset();
    tracing::info!(url = %config.ws_url, "telemetry subscription established");
    if events
        .send(ChannelEvent::ConnectionStateChanged { connected: true })
        .await
        .is_err()
    {
        return SessionEnd::ConsumerGone;
    }

    while let Some(message) = socket.next().await {
        let event = match message {
            Ok(Message::Text(text)) => match protocol::parse_weight_message(text.as_str()) {
                Ok(Some(reading)) => ChannelEvent::WeightUpdate(WeightUpdate {
                    weight: reading.weight,
                    // The platform only pushes settled values.
                    is_stable: true,
                    timestamp: DateTime::from_timestamp_millis(reading.ts_millis)
                        .unwrap_or_else(Utc::now),
                }),
                Ok(None) => {
                    tracing::debug!("telemetry message without weight ignored");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "telemetry payload rejected");
                    ChannelEvent::error(e.to_string())
                }
            },
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "telemetry socket closed by server");
                return TelemetryError::Closed.into();
            }
            Ok(_) => continue,
            Err(e) => return TelemetryError::Socket(e.to_string()).into(),
        };
        if events.send(event).await.is_err() {
            let _ = socket.close(None).await;
            return SessionEnd::ConsumerGone;
        }
    }
    TelemetryError::Closed.into()
}
