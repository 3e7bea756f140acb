// Local scale channel: one shared device, many consumers.
// The first consumer opens the device, the last one closes it.

use crate::line_reader::{DeviceOpener, LineReader};
use crate::models::{ChannelEvent, WeightUpdate};
use crate::stability::{StabilityClassifier, StabilityConfig};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct ScaleChannelConfig {
    /// Logical path consumers attach to, e.g. `/api/scale`. Used in logs and stats.
    pub name: String,
    pub device_path: String,
    pub baud_rate: u32,
    pub stability: StabilityConfig,
    /// Events buffered per consumer before a slow consumer starts lagging.
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleStats {
    pub name: String,
    pub consumers: usize,
    pub connected: bool,
    pub samples_published: u64,
    pub dropped_lines: u64,
}

/// Cheap to clone; all clones share the same device.
#[derive(Clone)]
pub struct LocalScaleChannel {
    shared: Arc<Shared>,
}

struct Shared {
    config: ScaleChannelConfig,
    opener: Arc<dyn DeviceOpener>,
    tx: broadcast::Sender<ChannelEvent>,
    device: Mutex<DeviceState>,
    connected: AtomicBool,
    consumers: AtomicUsize,
    samples_published: AtomicU64,
    dropped_lines: Arc<AtomicU64>,
}

#[derive(Default)]
struct DeviceState {
    consumers: usize,
    reader: Option<ReaderTask>,
}

struct ReaderTask {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ReaderTask {
    /// Stops the read loop and waits until the device has been closed.
    async fn stop(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "scale reader task failed");
        }
    }

    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl LocalScaleChannel {
    pub fn new(config: ScaleChannelConfig, opener: Arc<dyn DeviceOpener>) -> Self {
        let (tx, _) = broadcast::channel(config.capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                opener,
                tx,
                device: Mutex::new(DeviceState::default()),
                connected: AtomicBool::new(false),
                consumers: AtomicUsize::new(0),
                samples_published: AtomicU64::new(0),
                dropped_lines: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Attaches a consumer. Opens the device if it is not already running.
    ///
    /// The returned handle first yields the channel's current state: an error
    /// (if this call failed to open the device) and then the connection state.
    pub async fn connect(&self) -> ChannelHandle {
        let shared = &self.shared;
        let mut device = shared.device.lock().await;
        let mut pending = VecDeque::new();

        // A reader that has reported a device failure is as good as finished.
        let running = device.reader.as_ref().is_some_and(ReaderTask::is_running)
            && shared.connected.load(Ordering::Relaxed);
        let mut opened = None;
        if !running {
            if let Some(finished) = device.reader.take() {
                finished.stop().await;
            }
            match LineReader::open(
                shared.opener.as_ref(),
                &shared.config.device_path,
                shared.config.baud_rate,
            ) {
                Ok(reader) => {
                    shared.connected.store(true, Ordering::Relaxed);
                    let _ = shared
                        .tx
                        .send(ChannelEvent::ConnectionStateChanged { connected: true });
                    opened = Some(reader.with_drop_counter(shared.dropped_lines.clone()));
                }
                Err(e) => {
                    tracing::warn!(
                        channel = %shared.config.name,
                        error = %e,
                        operation = "open_device",
                        "scale device open failed"
                    );
                    shared.connected.store(false, Ordering::Relaxed);
                    let event = ChannelEvent::error(e.to_string());
                    let _ = shared.tx.send(event.clone());
                    pending.push_back(event);
                }
            }
        }

        // Subscribe before the reader starts so the first samples are not missed.
        let rx = shared.tx.subscribe();
        if let Some(reader) = opened {
            let (stop_tx, stop_rx) = oneshot::channel();
            let handle = tokio::spawn(run_reader(reader, shared.clone(), stop_rx));
            device.reader = Some(ReaderTask { stop_tx, handle });
        }
        pending.push_back(ChannelEvent::ConnectionStateChanged {
            connected: shared.connected.load(Ordering::Relaxed),
        });

        device.consumers += 1;
        shared.consumers.store(device.consumers, Ordering::Relaxed);
        tracing::info!(
            channel = %shared.config.name,
            consumers = device.consumers,
            "scale consumer connected"
        );

        ChannelHandle {
            shared: shared.clone(),
            rx,
            pending,
            released: false,
        }
    }

    pub fn stats(&self) -> ScaleStats {
        self.shared.stats()
    }
}

impl Shared {
    fn stats(&self) -> ScaleStats {
        ScaleStats {
            name: self.config.name.clone(),
            consumers: self.consumers.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            samples_published: self.samples_published.load(Ordering::Relaxed),
            dropped_lines: self.dropped_lines.load(Ordering::Relaxed),
        }
    }

    async fn release_consumer(&self) {
        let mut device = self.device.lock().await;
        device.consumers = device.consumers.saturating_sub(1);
        self.consumers.store(device.consumers, Ordering::Relaxed);
        tracing::info!(
            channel = %self.config.name,
            consumers = device.consumers,
            "scale consumer disconnected"
        );
        if device.consumers == 0 {
            if let Some(reader) = device.reader.take() {
                reader.stop().await;
            }
            self.connected.store(false, Ordering::Relaxed);
            tracing::info!(channel = %self.config.name, "last consumer left; scale device released");
        }
    }
}

async fn run_reader(
    mut reader: LineReader,
    shared: Arc<Shared>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut classifier = StabilityClassifier::new(shared.config.stability);
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            result = reader.next_sample() => match result {
                Ok(sample) => {
                    let is_stable = classifier.observe(&sample);
                    shared.samples_published.fetch_add(1, Ordering::Relaxed);
                    // No receivers is fine: consumers come and go.
                    let _ = shared.tx.send(ChannelEvent::WeightUpdate(WeightUpdate {
                        weight: sample.value,
                        is_stable,
                        timestamp: sample.source_timestamp,
                    }));
                }
                Err(e) => {
                    tracing::warn!(
                        channel = %shared.config.name,
                        error = %e,
                        operation = "read_device",
                        "scale device failed; consumers must reconnect"
                    );
                    shared.connected.store(false, Ordering::Relaxed);
                    let _ = shared.tx.send(ChannelEvent::error(e.to_string()));
                    let _ = shared
                        .tx
                        .send(ChannelEvent::ConnectionStateChanged { connected: false });
                    break;
                }
            },
        }
    }
    reader.close();
}

/// One consumer's attachment to a [`LocalScaleChannel`].
///
/// Call [`ChannelHandle::disconnect`] to release it; the device is closed
/// before that call returns when this was the last consumer. A handle that is
/// only dropped releases itself on a spawned task.
pub struct ChannelHandle {
    shared: Arc<Shared>,
    rx: broadcast::Receiver<ChannelEvent>,
    pending: VecDeque<ChannelEvent>,
    released: bool,
}

impl ChannelHandle {
    /// Next event in production order. Cancel safe.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        channel = %self.shared.config.name,
                        skipped = n,
                        "scale consumer lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn stats(&self) -> ScaleStats {
        self.shared.stats()
    }

    /// Takes the state queued by `connect` without waiting for live events.
    pub fn take_initial(&mut self) -> Vec<ChannelEvent> {
        self.pending.drain(..).collect()
    }

    /// Releases this consumer. The release runs on its own task, so it
    /// completes even if the caller stops polling.
    pub async fn disconnect(mut self) {
        self.released = true;
        let shared = self.shared.clone();
        if let Err(e) = tokio::spawn(async move { shared.release_consumer().await }).await {
            tracing::warn!(
                channel = %self.shared.config.name,
                error = %e,
                "scale consumer release failed"
            );
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let shared = self.shared.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { shared.release_consumer().await });
            }
            Err(_) => tracing::warn!(
                channel = %shared.config.name,
                "scale handle dropped outside the runtime; consumer not released"
            ),
        }
    }
}
