use crate::aggregator::CaptureStyle;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub scale: ScaleConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    pub publishing: PublishingConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Serial,
    /// Random readings instead of a real port (bench setups without a scale).
    Simulated,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScaleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub device: DeviceKind,
    /// Serial port path. `ARDUINO_PORT` overrides it.
    pub path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_stability_threshold")]
    pub stability_threshold: f64,
    #[serde(default = "default_stability_count")]
    pub stability_count: u32,
}

fn default_true() -> bool {
    true
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_stability_threshold() -> f64 {
    crate::stability::STABILITY_THRESHOLD
}

fn default_stability_count() -> u32 {
    crate::stability::STABILITY_COUNT
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    pub interval_ms: u64,
    pub min_weight: f64,
    pub max_weight: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            min_weight: 20_000.0,
            max_weight: 30_000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,
    /// REST base, e.g. `https://thingsboard.example.com`.
    #[serde(default)]
    pub base_url: String,
    /// Subscription socket, e.g. `wss://thingsboard.example.com/api/ws/plugins/telemetry`.
    #[serde(default)]
    pub ws_url: String,
    /// `TB_USERNAME` overrides it.
    #[serde(default)]
    pub username: String,
    /// `TB_PASSWORD` overrides it.
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    #[serde(default)]
    pub entity_id: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    /// Give up after this many consecutive failed reconnects. Unset retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            ws_url: String::new(),
            username: String::new(),
            password: String::new(),
            entity_type: default_entity_type(),
            entity_id: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
            max_attempts: None,
        }
    }
}

fn default_entity_type() -> String {
    "DEVICE".into()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_retry_initial_ms() -> u64 {
    1000
}

fn default_retry_max_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub style: CaptureStyle,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    /// Events buffered per scale consumer before a slow consumer starts lagging.
    pub broadcast_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often to log aggregator stats (consumers, samples, dropped lines) at INFO level.
    pub stats_log_interval_secs: u64,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        let mut config: AppConfig = toml::from_str(&s)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `ARDUINO_PORT`, `ARDUINO_BAUD_RATE`, `TB_USERNAME` and `TB_PASSWORD`
    /// from `lookup`. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(path) = var("ARDUINO_PORT") {
            self.scale.path = path;
        }
        if let Some(baud) = var("ARDUINO_BAUD_RATE") {
            self.scale.baud_rate = baud.parse().map_err(|e| {
                anyhow::anyhow!("ARDUINO_BAUD_RATE must be a positive integer, got {baud:?}: {e}")
            })?;
        }
        if let Some(username) = var("TB_USERNAME") {
            self.telemetry.username = username;
        }
        if let Some(password) = var("TB_PASSWORD") {
            self.telemetry.password = password;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.scale.enabled || !self.scale.path.is_empty(),
            "scale.path must be non-empty when scale.enabled"
        );
        anyhow::ensure!(
            self.scale.baud_rate > 0,
            "scale.baud_rate must be > 0, got {}",
            self.scale.baud_rate
        );
        anyhow::ensure!(
            self.scale.stability_threshold.is_finite() && self.scale.stability_threshold > 0.0,
            "scale.stability_threshold must be > 0, got {}",
            self.scale.stability_threshold
        );
        anyhow::ensure!(
            self.scale.stability_count > 0,
            "scale.stability_count must be > 0, got {}",
            self.scale.stability_count
        );
        anyhow::ensure!(
            self.simulator.interval_ms > 0,
            "simulator.interval_ms must be > 0, got {}",
            self.simulator.interval_ms
        );
        anyhow::ensure!(
            self.simulator.min_weight < self.simulator.max_weight
                && (self.simulator.max_weight - self.simulator.min_weight).is_finite(),
            "simulator.min_weight must be < simulator.max_weight with a finite span, got {}..{}",
            self.simulator.min_weight,
            self.simulator.max_weight
        );
        if self.telemetry.enabled {
            anyhow::ensure!(
                !self.telemetry.base_url.is_empty(),
                "telemetry.base_url must be non-empty when telemetry.enabled"
            );
            anyhow::ensure!(
                !self.telemetry.ws_url.is_empty(),
                "telemetry.ws_url must be non-empty when telemetry.enabled"
            );
            anyhow::ensure!(
                !self.telemetry.entity_id.is_empty(),
                "telemetry.entity_id must be non-empty when telemetry.enabled"
            );
        }
        anyhow::ensure!(
            self.telemetry.request_timeout_secs > 0,
            "telemetry.request_timeout_secs must be > 0, got {}",
            self.telemetry.request_timeout_secs
        );
        anyhow::ensure!(
            self.telemetry.retry_initial_ms > 0,
            "telemetry.retry_initial_ms must be > 0, got {}",
            self.telemetry.retry_initial_ms
        );
        anyhow::ensure!(
            self.telemetry.retry_max_ms >= self.telemetry.retry_initial_ms,
            "telemetry.retry_max_ms must be >= telemetry.retry_initial_ms, got {}",
            self.telemetry.retry_max_ms
        );
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        Ok(())
    }
}
