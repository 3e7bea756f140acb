// Weight samples, channel events and their browser wire form

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One parsed reading, stamped when the reader produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightSample {
    pub value: f64,
    pub source_timestamp: DateTime<Utc>,
}

impl WeightSample {
    pub fn now(value: f64) -> Self {
        Self {
            value,
            source_timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightUpdate {
    pub weight: f64,
    pub is_stable: bool,
    pub timestamp: DateTime<Utc>,
}

/// What every channel emits. The aggregator depends on nothing else.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    WeightUpdate(WeightUpdate),
    ConnectionStateChanged { connected: bool },
    ChannelError { message: String },
}

impl ChannelEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ChannelEvent::ChannelError {
            message: message.into(),
        }
    }
}

/// Browser frame: `{"event": "weight-update", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum WireEvent {
    WeightUpdate(WeightUpdate),
    ScaleError { message: String },
    Connection { connected: bool },
}

impl From<ChannelEvent> for WireEvent {
    fn from(event: ChannelEvent) -> Self {
        match event {
            ChannelEvent::WeightUpdate(update) => WireEvent::WeightUpdate(update),
            ChannelEvent::ConnectionStateChanged { connected } => {
                WireEvent::Connection { connected }
            }
            ChannelEvent::ChannelError { message } => WireEvent::ScaleError { message },
        }
    }
}
