// Aggregator task: owns both channel handles, folds their events into a
// `WeightAggregator` and publishes a `WeightView` on every change.

use super::{CaptureError, CaptureStyle, Source, WeightAggregator};
use crate::models::{ActiveSource, CaptureMode, CaptureOutcome, ChannelEvent, WeightView};
use crate::scale_channel::{ChannelHandle, LocalScaleChannel};
use crate::telemetry::RemoteHandle;
use std::sync::{Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};

const COMMAND_CAPACITY: usize = 32;

/// Channels the aggregator consumes. Either may be absent.
///
/// The task attaches to `local` itself so it can reopen the device on request.
pub struct AggregatorDeps {
    pub local: Option<LocalScaleChannel>,
    pub remote: Option<RemoteHandle>,
}

pub struct AggregatorConfig {
    pub style: CaptureStyle,
    /// How often to log aggregator stats (real seconds).
    pub stats_log_interval_secs: u64,
}

enum Command {
    StartCapture {
        mode: CaptureMode,
        reply: oneshot::Sender<Result<WeightView, CaptureError>>,
    },
    CaptureNow {
        reply: oneshot::Sender<CaptureOutcome>,
    },
    SubmitManual {
        weight: f64,
        reply: oneshot::Sender<Result<CaptureOutcome, CaptureError>>,
    },
    Reset {
        reply: oneshot::Sender<WeightView>,
    },
    ReconnectLocal {
        reply: oneshot::Sender<WeightView>,
    },
}

/// Front door to the aggregator task.
pub struct AggregatorHandle {
    commands: mpsc::Sender<Command>,
    view_rx: watch::Receiver<WeightView>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AggregatorHandle {
    /// Receiver that is notified whenever the view changes.
    pub fn subscribe(&self) -> watch::Receiver<WeightView> {
        self.view_rx.clone()
    }

    pub fn current(&self) -> WeightView {
        self.view_rx.borrow().clone()
    }

    pub async fn start_capture(&self, mode: CaptureMode) -> Result<WeightView, CaptureError> {
        self.request(|reply| Command::StartCapture { mode, reply })
            .await?
    }

    pub async fn capture_now(&self) -> Result<CaptureOutcome, CaptureError> {
        self.request(|reply| Command::CaptureNow { reply }).await
    }

    /// Enters manual mode if needed and records `weight`. Fails while any source is connected.
    pub async fn submit_manual(&self, weight: f64) -> Result<CaptureOutcome, CaptureError> {
        self.request(|reply| Command::SubmitManual { weight, reply })
            .await?
    }

    pub async fn reset(&self) -> Result<WeightView, CaptureError> {
        self.request(|reply| Command::Reset { reply }).await
    }

    /// Releases the local scale and attaches again, reopening the device if no
    /// other consumer holds it. The returned view reflects the new attempt.
    pub async fn reconnect_local(&self) -> Result<WeightView, CaptureError> {
        self.request(|reply| Command::ReconnectLocal { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| CaptureError::ServiceStopped)?;
        rx.await.map_err(|_| CaptureError::ServiceStopped)
    }

    /// Stops the task and waits until both channel handles are released.
    pub async fn shutdown(&self) {
        let shutdown_tx = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.lock().await.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, operation = "aggregator_shutdown", "aggregator task failed");
        }
    }
}

pub fn spawn(deps: AggregatorDeps, config: AggregatorConfig) -> AggregatorHandle {
    let AggregatorDeps {
        local: scale,
        remote,
    } = deps;
    let AggregatorConfig {
        style,
        stats_log_interval_secs,
    } = config;

    let aggregator = WeightAggregator::new(style);
    let (view_tx, view_rx) = watch::channel(aggregator.view());
    let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(run(
        aggregator,
        scale,
        remote,
        command_rx,
        view_tx,
        shutdown_rx,
        Duration::from_secs(stats_log_interval_secs.max(1)),
    ));

    AggregatorHandle {
        commands,
        view_rx,
        shutdown_tx: Mutex::new(Some(shutdown_tx)),
        task: tokio::sync::Mutex::new(Some(task)),
    }
}

async fn next_local(local: &mut Option<ChannelHandle>) -> Option<ChannelEvent> {
    match local {
        Some(handle) => handle.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_remote(remote: &mut Option<RemoteHandle>) -> Option<ChannelEvent> {
    match remote {
        Some(handle) => handle.recv().await,
        None => std::future::pending().await,
    }
}

fn publish(view_tx: &watch::Sender<WeightView>, aggregator: &WeightAggregator) {
    let view = aggregator.view();
    view_tx.send_if_modified(|current| {
        if *current == view {
            return false;
        }
        *current = view;
        true
    });
}

async fn run(
    mut aggregator: WeightAggregator,
    scale: Option<LocalScaleChannel>,
    mut remote: Option<RemoteHandle>,
    mut command_rx: mpsc::Receiver<Command>,
    view_tx: watch::Sender<WeightView>,
    mut shutdown_rx: oneshot::Receiver<()>,
    stats_log_interval: Duration,
) {
    let mut stats_log_tick = interval(stats_log_interval);
    stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut local_events: u64 = 0;
    let mut remote_events: u64 = 0;
    let mut local = None;
    if let Some(scale) = &scale {
        local = Some(attach_local(scale, &mut aggregator).await);
        publish(&view_tx, &aggregator);
    }

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                tracing::debug!("aggregator shutting down");
                break;
            }
            event = next_local(&mut local) => match event {
                Some(event) => {
                    local_events += 1;
                    aggregator.apply(Source::Local, event);
                    publish(&view_tx, &aggregator);
                }
                None => {
                    tracing::warn!("local scale channel closed");
                    local = None;
                }
            },
            event = next_remote(&mut remote) => match event {
                Some(event) => {
                    remote_events += 1;
                    aggregator.apply(Source::Remote, event);
                    publish(&view_tx, &aggregator);
                }
                None => {
                    tracing::warn!("telemetry channel stopped; remote source detached");
                    if let Some(handle) = remote.take() {
                        handle.shutdown().await;
                    }
                }
            },
            command = command_rx.recv() => match command {
                Some(Command::ReconnectLocal { reply }) => {
                    if let Some(scale) = &scale {
                        if let Some(handle) = local.take() {
                            handle.disconnect().await;
                        }
                        aggregator.apply(
                            Source::Local,
                            ChannelEvent::ConnectionStateChanged { connected: false },
                        );
                        local = Some(attach_local(scale, &mut aggregator).await);
                        tracing::info!(
                            connected = aggregator.active_source() == ActiveSource::Local,
                            "local scale reconnected"
                        );
                    }
                    publish(&view_tx, &aggregator);
                    let _ = reply.send(aggregator.view());
                }
                Some(command) => {
                    handle_command(&mut aggregator, command);
                    publish(&view_tx, &aggregator);
                }
                None => break,
            },
            _ = stats_log_tick.tick() => {
                let local_stats = local.as_ref().map(ChannelHandle::stats);
                tracing::info!(
                    active_source = ?aggregator.active_source(),
                    local_events,
                    remote_events,
                    scale_consumers = local_stats.as_ref().map_or(0, |s| s.consumers),
                    samples_published = local_stats.as_ref().map_or(0, |s| s.samples_published),
                    dropped_lines = local_stats.as_ref().map_or(0, |s| s.dropped_lines),
                    view_watchers = view_tx.receiver_count(),
                    "aggregator stats"
                );
            }
        }
    }

    if let Some(handle) = local.take() {
        handle.disconnect().await;
    }
    if let Some(handle) = remote.take() {
        handle.shutdown().await;
    }
}

/// Connects to `scale` and folds the state it reports on attach (an open
/// error, then the connection state) before any later event.
async fn attach_local(scale: &LocalScaleChannel, aggregator: &mut WeightAggregator) -> ChannelHandle {
    let mut handle = scale.connect().await;
    for event in handle.take_initial() {
        aggregator.apply(Source::Local, event);
    }
    handle
}

fn handle_command(aggregator: &mut WeightAggregator, command: Command) {
    // A dropped reply only means the caller went away.
    match command {
        Command::StartCapture { mode, reply } => {
            let result = aggregator.start_capture(mode).map(|()| aggregator.view());
            let _ = reply.send(result);
        }
        Command::CaptureNow { reply } => {
            let captured = aggregator.capture_current();
            let _ = reply.send(CaptureOutcome {
                captured,
                view: aggregator.view(),
            });
        }
        Command::SubmitManual { weight, reply } => {
            let result = aggregator
                .enter_manual()
                .and_then(|()| aggregator.submit_manual(weight))
                .map(|captured| CaptureOutcome {
                    captured: Some(captured),
                    view: aggregator.view(),
                });
            let _ = reply.send(result);
        }
        Command::Reset { reply } => {
            aggregator.reset_capture();
            let _ = reply.send(aggregator.view());
        }
        Command::ReconnectLocal { reply } => {
            // Handled in `run`, which owns the scale channel.
            let _ = reply.send(aggregator.view());
        }
    }
}
