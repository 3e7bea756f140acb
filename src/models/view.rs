// Unified weight view published by the aggregator

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveSource {
    Local,
    Remote,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    #[default]
    None,
    Gross,
    Tare,
}

/// A value recorded by the capture workflow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Captured {
    pub mode: CaptureMode,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureView {
    pub mode: CaptureMode,
    pub gross_weight: Option<f64>,
    pub tare_weight: Option<f64>,
    /// Always `gross - tare` at the time the view was built.
    pub net_weight: f64,
    pub manual: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightView {
    pub weight: f64,
    pub is_stable: bool,
    pub is_connected: bool,
    pub active_source: ActiveSource,
    pub local_connected: bool,
    pub remote_connected: bool,
    pub error: Option<String>,
    pub local_error: Option<String>,
    pub remote_error: Option<String>,
    pub capture: CaptureView,
}

/// Result of a capture request: what was recorded (if anything) and the view afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOutcome {
    pub captured: Option<Captured>,
    pub view: WeightView,
}
