// Process-wide wiring: the scale channels, the telemetry client and the
// aggregator, created once and shared by every route.

use crate::aggregator::{self, AggregatorConfig, AggregatorDeps, AggregatorHandle};
use crate::config::{AppConfig, DeviceKind};
use crate::line_reader::{DeviceOpener, SerialOpener};
use crate::scale_channel::{LocalScaleChannel, ScaleChannelConfig};
use crate::simulator::SimulatedOpener;
use crate::stability::StabilityConfig;
use crate::telemetry::{self, BackoffConfig, EntityRef, RemoteChannelConfig, TelemetryClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

pub const SCALE_CHANNEL: &str = "/api/scale";
pub const SIMULATOR_CHANNEL: &str = "/api/websocket";

pub struct Bridge {
    config: AppConfig,
    scale: Option<LocalScaleChannel>,
    simulator: LocalScaleChannel,
    telemetry: Option<TelemetryClient>,
    aggregator: OnceCell<AggregatorHandle>,
}

impl Bridge {
    /// Builds the bridge with the device openers `config` asks for.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let simulated = Arc::new(simulated_opener(&config));
        let scale_opener: Arc<dyn DeviceOpener> = match config.scale.device {
            DeviceKind::Serial => Arc::new(SerialOpener),
            DeviceKind::Simulated => simulated.clone(),
        };
        Self::with_openers(config, scale_opener, simulated)
    }

    /// Builds the bridge around caller-supplied openers (tests use in-memory devices).
    pub fn with_openers(
        config: AppConfig,
        scale_opener: Arc<dyn DeviceOpener>,
        simulator_opener: Arc<dyn DeviceOpener>,
    ) -> anyhow::Result<Self> {
        let stability = StabilityConfig {
            threshold: config.scale.stability_threshold,
            count: config.scale.stability_count,
        };
        let capacity = config.publishing.broadcast_capacity;

        let scale = config.scale.enabled.then(|| {
            LocalScaleChannel::new(
                ScaleChannelConfig {
                    name: SCALE_CHANNEL.into(),
                    device_path: config.scale.path.clone(),
                    baud_rate: config.scale.baud_rate,
                    stability,
                    capacity,
                },
                scale_opener,
            )
        });
        let simulator = LocalScaleChannel::new(
            ScaleChannelConfig {
                name: SIMULATOR_CHANNEL.into(),
                device_path: "simulated".into(),
                baud_rate: config.scale.baud_rate,
                stability,
                capacity,
            },
            simulator_opener,
        );

        let telemetry = if config.telemetry.enabled {
            Some(TelemetryClient::new(
                &config.telemetry.base_url,
                &config.telemetry.username,
                &config.telemetry.password,
                Duration::from_secs(config.telemetry.request_timeout_secs),
            )?)
        } else {
            None
        };

        Ok(Self {
            config,
            scale,
            simulator,
            telemetry,
            aggregator: OnceCell::new(),
        })
    }

    /// Starts the aggregator and its channels on first call; later calls
    /// return the same handle.
    pub async fn ensure_started(&self) -> &AggregatorHandle {
        self.aggregator
            .get_or_init(|| async {
                let local = self.scale.clone();
                let remote = self
                    .telemetry
                    .clone()
                    .map(|client| telemetry::spawn(self.remote_config(), client));
                tracing::info!(
                    scale = local.is_some(),
                    telemetry = remote.is_some(),
                    style = ?self.config.capture.style,
                    "weight aggregator started"
                );
                aggregator::spawn(
                    AggregatorDeps { local, remote },
                    AggregatorConfig {
                        style: self.config.capture.style,
                        stats_log_interval_secs: self.config.monitoring.stats_log_interval_secs,
                    },
                )
            })
            .await
    }

    pub fn aggregator(&self) -> Option<&AggregatorHandle> {
        self.aggregator.get()
    }

    pub fn scale(&self) -> Option<&LocalScaleChannel> {
        self.scale.as_ref()
    }

    pub fn simulator(&self) -> &LocalScaleChannel {
        &self.simulator
    }

    pub fn telemetry(&self) -> Option<&TelemetryClient> {
        self.telemetry.as_ref()
    }

    pub fn telemetry_entity(&self) -> EntityRef {
        EntityRef {
            entity_type: self.config.telemetry.entity_type.clone(),
            entity_id: self.config.telemetry.entity_id.clone(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Stops the aggregator, releasing the scale device and the telemetry socket.
    pub async fn shutdown(&self) {
        if let Some(aggregator) = self.aggregator.get() {
            aggregator.shutdown().await;
        }
    }

    fn remote_config(&self) -> RemoteChannelConfig {
        let telemetry = &self.config.telemetry;
        RemoteChannelConfig {
            ws_url: telemetry.ws_url.clone(),
            entity: self.telemetry_entity(),
            retry: BackoffConfig {
                initial: Duration::from_millis(telemetry.retry_initial_ms),
                max: Duration::from_millis(telemetry.retry_max_ms),
                max_attempts: telemetry.max_attempts,
            },
            capacity: self.config.publishing.broadcast_capacity,
        }
    }
}

fn simulated_opener(config: &AppConfig) -> SimulatedOpener {
    SimulatedOpener {
        interval: Duration::from_millis(config.simulator.interval_ms),
        min_weight: config.simulator.min_weight,
        max_weight: config.simulator.max_weight,
    }
}
