// Remote telemetry platform (ThingsBoard) integration

mod backoff;
mod channel;
mod client;
mod protocol;

pub use backoff::{Backoff, BackoffConfig};
pub use channel::{RemoteChannelConfig, RemoteHandle, spawn};
pub use client::{LoginResponse, TelemetryClient};
pub use protocol::{EntityRef, RemoteReading, parse_weight_message, subscribe_message};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry login failed: {0}")]
    Auth(String),
    #[error("telemetry request failed: {0}")]
    Http(String),
    #[error("telemetry socket error: {0}")]
    Socket(String),
    #[error("malformed telemetry payload: {0}")]
    MalformedPayload(String),
    #[error("telemetry socket closed")]
    Closed,
}
