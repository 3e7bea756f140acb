// Gross -> tare capture session. Net weight is derived, never stored.

use crate::models::{CaptureMode, Captured};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("tare can only be captured after gross")]
    GrossRequired,
    #[error("manual entry is only available while no scale is connected")]
    SourceConnected,
    #[error("manual entry is not active")]
    NotManual,
    #[error("weight must be a finite number")]
    InvalidWeight,
    #[error("weight aggregator is not running")]
    ServiceStopped,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureSession {
    mode: CaptureMode,
    captured_gross: Option<f64>,
    captured_tare: Option<f64>,
}

impl CaptureSession {
    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn gross(&self) -> Option<f64> {
        self.captured_gross
    }

    pub fn tare(&self) -> Option<f64> {
        self.captured_tare
    }

    pub fn net_weight(&self) -> f64 {
        self.captured_gross.unwrap_or(0.0) - self.captured_tare.unwrap_or(0.0)
    }

    /// Gross starts a fresh ticket; tare needs a captured gross; `None` cancels.
    pub fn start(&mut self, mode: CaptureMode) -> Result<(), CaptureError> {
        match mode {
            CaptureMode::Gross => {
                self.captured_gross = None;
                self.captured_tare = None;
            }
            CaptureMode::Tare => {
                if self.captured_gross.is_none() {
                    return Err(CaptureError::GrossRequired);
                }
                self.captured_tare = None;
            }
            CaptureMode::None => {}
        }
        self.mode = mode;
        Ok(())
    }

    /// Records `weight` for the current mode and advances (gross -> tare -> none).
    pub fn record(&mut self, weight: f64) -> Option<Captured> {
        let mode = self.mode;
        match mode {
            CaptureMode::None => return None,
            CaptureMode::Gross => {
                self.captured_gross = Some(weight);
                self.mode = CaptureMode::Tare;
            }
            CaptureMode::Tare => {
                self.captured_tare = Some(weight);
                self.mode = CaptureMode::None;
            }
        }
        Some(Captured { mode, weight })
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
