// Config loading and validation tests

use std::collections::HashMap;
use weighbridge::aggregator::CaptureStyle;
use weighbridge::config::{AppConfig, DeviceKind};

const VALID_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[scale]
device = "simulated"
path = "COM3"
baud_rate = 9600

[simulator]
interval_ms = 500
min_weight = 10.0
max_weight = 50.0

[telemetry]
enabled = true
base_url = "https://tb.example.com"
ws_url = "wss://tb.example.com/api/ws/plugins/telemetry"
entity_id = "0f1e2d3c"
max_attempts = 5

[capture]
style = "explicit"

[publishing]
broadcast_capacity = 60

[monitoring]
stats_log_interval_secs = 60
"#;

const MINIMAL_CONFIG: &str = r#"
[server]
port = 3000
host = "127.0.0.1"

[scale]
path = "/dev/ttyUSB0"

[publishing]
broadcast_capacity = 16

[monitoring]
stats_log_interval_secs = 30
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.scale.device, DeviceKind::Simulated);
    assert_eq!(config.scale.path, "COM3");
    assert_eq!(config.simulator.interval_ms, 500);
    assert!(config.telemetry.enabled);
    assert_eq!(config.telemetry.entity_type, "DEVICE");
    assert_eq!(config.telemetry.max_attempts, Some(5));
    assert_eq!(config.capture.style, CaptureStyle::Explicit);
    assert_eq!(config.publishing.broadcast_capacity, 60);
}

#[test]
fn test_config_defaults() {
    let config = AppConfig::load_from_str(MINIMAL_CONFIG).expect("load_from_str");
    assert!(config.scale.enabled);
    assert_eq!(config.scale.device, DeviceKind::Serial);
    assert_eq!(config.scale.baud_rate, 9600);
    assert_eq!(config.scale.stability_threshold, 0.1);
    assert_eq!(config.scale.stability_count, 5);
    assert!(!config.telemetry.enabled);
    assert_eq!(config.telemetry.retry_initial_ms, 1000);
    assert_eq!(config.telemetry.retry_max_ms, 30_000);
    assert_eq!(config.telemetry.max_attempts, None);
    assert_eq!(config.capture.style, CaptureStyle::AutoAdvance);
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = VALID_CONFIG.replace("port = 8081", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_validation_rejects_empty_scale_path() {
    let bad = VALID_CONFIG.replace("path = \"COM3\"", "path = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("scale.path"));
}

#[test]
fn test_config_allows_empty_path_when_scale_disabled() {
    let config = VALID_CONFIG.replace("path = \"COM3\"", "enabled = false\npath = \"\"");
    assert!(AppConfig::load_from_str(&config).is_ok());
}

#[test]
fn test_config_validation_rejects_unbounded_simulator_span() {
    let bad = VALID_CONFIG
        .replace("min_weight = 10.0", "min_weight = -1e308")
        .replace("max_weight = 50.0", "max_weight = 1e308");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("finite span"));
}

#[test]
fn test_config_validation_rejects_inverted_simulator_range() {
    let bad = VALID_CONFIG.replace("max_weight = 50.0", "max_weight = 5.0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("simulator.min_weight"));
}

#[test]
fn test_config_validation_rejects_missing_entity_id() {
    let bad = VALID_CONFIG.replace("entity_id = \"0f1e2d3c\"", "");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("telemetry.entity_id"));
}

#[test]
fn test_config_validation_rejects_zero_stability_count() {
    let bad = VALID_CONFIG.replace("baud_rate = 9600", "baud_rate = 9600\nstability_count = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("scale.stability_count"));
}

#[test]
fn test_config_validation_rejects_broadcast_capacity_zero() {
    let bad = VALID_CONFIG.replace("broadcast_capacity = 60", "broadcast_capacity = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("broadcast_capacity"));
}

#[test]
fn test_config_rejects_unknown_capture_style() {
    let bad = VALID_CONFIG.replace("style = \"explicit\"", "style = \"sometimes\"");
    assert!(AppConfig::load_from_str(&bad).is_err());
}

#[test]
fn test_env_overrides_apply() {
    let mut config = AppConfig::load_from_str(VALID_CONFIG).unwrap();
    let env: HashMap<&str, &str> = HashMap::from([
        ("ARDUINO_PORT", "/dev/ttyACM0"),
        ("ARDUINO_BAUD_RATE", "115200"),
        ("TB_USERNAME", "tenant@example.com"),
        ("TB_PASSWORD", ""),
    ]);
    config
        .apply_env(|key| env.get(key).map(|v| v.to_string()))
        .unwrap();
    assert_eq!(config.scale.path, "/dev/ttyACM0");
    assert_eq!(config.scale.baud_rate, 115_200);
    assert_eq!(config.telemetry.username, "tenant@example.com");
    // Empty values leave the file setting alone.
    assert_eq!(config.telemetry.password, "");
}

#[test]
fn test_env_override_rejects_bad_baud_rate() {
    let mut config = AppConfig::load_from_str(VALID_CONFIG).unwrap();
    let err = config
        .apply_env(|key| (key == "ARDUINO_BAUD_RATE").then(|| "fast".to_string()))
        .unwrap_err();
    assert!(err.to_string().contains("ARDUINO_BAUD_RATE"));
}

#[test]
fn test_load_reads_config_file_env() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, MINIMAL_CONFIG).unwrap();
    // SAFETY: no other test in this binary reads these variables.
    unsafe {
        std::env::set_var("CONFIG_FILE", &path);
        std::env::set_var("ARDUINO_PORT", "/dev/ttyS9");
    }
    let config = AppConfig::load().unwrap();
    unsafe {
        std::env::remove_var("CONFIG_FILE");
        std::env::remove_var("ARDUINO_PORT");
    }
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.scale.path, "/dev/ttyS9");
}
