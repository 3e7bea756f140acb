// Weight source aggregation: local scale wins over remote telemetry, and
// the capture workflow reads whichever source is active.

mod capture;
mod service;

pub use capture::{CaptureError, CaptureSession};
pub use service::{AggregatorConfig, AggregatorDeps, AggregatorHandle, spawn};

use crate::models::{ActiveSource, CaptureMode, CaptureView, Captured, ChannelEvent, WeightView};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Local,
    Remote,
}

/// `Auto` records on every stable update from the active source;
/// `Explicit` waits for `capture_current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStyle {
    #[default]
    #[serde(rename = "auto")]
    AutoAdvance,
    Explicit,
}

#[derive(Debug, Clone, Default)]
struct SourceState {
    connected: bool,
    weight: f64,
    is_stable: bool,
    error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WeightAggregator {
    style: CaptureStyle,
    local: SourceState,
    remote: SourceState,
    capture: CaptureSession,
    manual: bool,
}

impl WeightAggregator {
    pub fn new(style: CaptureStyle) -> Self {
        Self {
            style,
            ..Self::default()
        }
    }

    fn state_mut(&mut self, source: Source) -> &mut SourceState {
        match source {
            Source::Local => &mut self.local,
            Source::Remote => &mut self.remote,
        }
    }

    /// Folds one channel event into the state. Returns what was captured, if anything.
    pub fn apply(&mut self, source: Source, event: ChannelEvent) -> Option<Captured> {
        match event {
            ChannelEvent::WeightUpdate(update) => {
                let state = self.state_mut(source);
                state.weight = update.weight;
                state.is_stable = match source {
                    Source::Local => update.is_stable,
                    Source::Remote => true,
                };
                let from_active = match (source, self.active_source()) {
                    (Source::Local, ActiveSource::Local) => true,
                    (Source::Remote, ActiveSource::Remote) => true,
                    _ => false,
                };
                if self.style == CaptureStyle::AutoAdvance && from_active {
                    return self.capture_current();
                }
                None
            }
            ChannelEvent::ConnectionStateChanged { connected } => {
                let state = self.state_mut(source);
                state.connected = connected;
                // A reopened device starts a fresh stability run.
                state.is_stable = false;
                if !connected {
                    state.weight = 0.0;
                }
                if connected {
                    state.error = None;
                    self.manual = false;
                }
                None
            }
            ChannelEvent::ChannelError { message } => {
                self.state_mut(source).error = Some(message);
                None
            }
        }
    }

    pub fn active_source(&self) -> ActiveSource {
        if self.local.connected {
            ActiveSource::Local
        } else if self.remote.connected {
            ActiveSource::Remote
        } else {
            ActiveSource::None
        }
    }

    pub fn effective_weight(&self) -> f64 {
        match self.active_source() {
            ActiveSource::Local => self.local.weight,
            ActiveSource::Remote => self.remote.weight,
            ActiveSource::None => 0.0,
        }
    }

    pub fn effective_stable(&self) -> bool {
        match self.active_source() {
            ActiveSource::Local => self.local.is_stable,
            _ => true,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.local.connected || self.remote.connected
    }

    /// The active source's error, else the first one set (local, then remote).
    pub fn error(&self) -> Option<&str> {
        let active = match self.active_source() {
            ActiveSource::Local => self.local.error.as_deref(),
            ActiveSource::Remote => self.remote.error.as_deref(),
            ActiveSource::None => None,
        };
        active
            .or(self.local.error.as_deref())
            .or(self.remote.error.as_deref())
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.capture.mode()
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    pub fn net_weight(&self) -> f64 {
        self.capture.net_weight()
    }

    pub fn start_capture(&mut self, mode: CaptureMode) -> Result<(), CaptureError> {
        self.capture.start(mode)
    }

    /// Records the effective weight. No-op unless a mode is armed, a source is
    /// active and its reading is stable.
    pub fn capture_current(&mut self) -> Option<Captured> {
        if self.manual
            || self.capture.mode() == CaptureMode::None
            || self.active_source() == ActiveSource::None
            || !self.effective_stable()
        {
            return None;
        }
        let captured = self.capture.record(self.effective_weight());
        if let Some(captured) = captured {
            tracing::info!(mode = ?captured.mode, weight = captured.weight, "weight captured");
        }
        captured
    }

    pub fn enter_manual(&mut self) -> Result<(), CaptureError> {
        if self.is_connected() {
            return Err(CaptureError::SourceConnected);
        }
        self.manual = true;
        Ok(())
    }

    /// Records a typed-in weight: gross first, then tare.
    pub fn submit_manual(&mut self, weight: f64) -> Result<Captured, CaptureError> {
        if !self.manual {
            return Err(CaptureError::NotManual);
        }
        if !weight.is_finite() {
            return Err(CaptureError::InvalidWeight);
        }
        if self.capture.mode() == CaptureMode::None {
            let next = match (self.capture.gross(), self.capture.tare()) {
                (Some(_), None) => CaptureMode::Tare,
                _ => CaptureMode::Gross,
            };
            self.capture.start(next)?;
        }
        self.capture
            .record(weight)
            .ok_or(CaptureError::GrossRequired)
    }

    pub fn reset_capture(&mut self) {
        self.capture.reset();
    }

    pub fn view(&self) -> WeightView {
        WeightView {
            weight: self.effective_weight(),
            is_stable: self.effective_stable(),
            is_connected: self.is_connected(),
            active_source: self.active_source(),
            local_connected: self.local.connected,
            remote_connected: self.remote.connected,
            error: self.error().map(str::to_string),
            local_error: self.local.error.clone(),
            remote_error: self.remote.error.clone(),
            capture: CaptureView {
                mode: self.capture.mode(),
                gross_weight: self.capture.gross(),
                tare_weight: self.capture.tare(),
                net_weight: self.capture.net_weight(),
                manual: self.manual,
            },
        }
    }
}
