// Line-oriented weight device: open by address, read newline-delimited
// records, parse each as a number.

mod serial;

pub use serial::SerialOpener;

use crate::models::WeightSample;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Device could not be opened. Carries the platform error text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    #[error("device {path} not found: {message}")]
    NotFound { path: String, message: String },
    #[error("access denied to {path}: {message}")]
    AccessDenied { path: String, message: String },
    #[error("invalid settings for {path}: {message}")]
    InvalidSettings { path: String, message: String },
    #[error("failed to open {path}: {message}")]
    Other { path: String, message: String },
}

/// Device failed after a successful open.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("device read failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("device stream ended")]
    Ended,
    #[error("device already closed")]
    Closed,
}

/// A byte-stream device that yields raw text lines.
#[async_trait]
pub trait LineDevice: Send {
    /// Next raw line. `Ok(None)` means the stream ended.
    async fn read_line(&mut self) -> Result<Option<String>, RuntimeError>;

    /// Releases the underlying device. [`LineReader`] calls this at most once.
    fn close(&mut self);
}

/// Opens devices by address. Never retries; retry policy belongs to the caller.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, address: &str, baud_rate: u32) -> Result<Box<dyn LineDevice>, OpenError>;
}

/// Parses the leading number of a scale line (`"  20.5 kg"` -> 20.5).
/// Lines without a finite leading number yield `None`.
pub fn parse_weight(line: &str) -> Option<f64> {
    let trimmed = line.trim();
    let candidate_len = trimmed
        .char_indices()
        .take_while(|&(i, c)| match c {
            '0'..='9' | '.' | 'e' | 'E' => true,
            '+' | '-' => i == 0 || trimmed[..i].ends_with(['e', 'E']),
            _ => false,
        })
        .last()
        .map(|(i, c)| i + c.len_utf8())?;
    (1..=candidate_len)
        .rev()
        .find_map(|len| trimmed[..len].parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Reads weight samples from one open device.
///
/// Malformed lines are skipped and counted in [`LineReader::dropped_lines`].
/// Closing is idempotent and also happens on drop.
pub struct LineReader {
    device: Box<dyn LineDevice>,
    dropped_lines: Arc<AtomicU64>,
    closed: bool,
}

impl LineReader {
    pub fn open(
        opener: &dyn DeviceOpener,
        address: &str,
        baud_rate: u32,
    ) -> Result<Self, OpenError> {
        Ok(Self::from_device(opener.open(address, baud_rate)?))
    }

    pub fn from_device(device: Box<dyn LineDevice>) -> Self {
        Self {
            device,
            dropped_lines: Arc::new(AtomicU64::new(0)),
            closed: false,
        }
    }

    /// Share a counter with an owner that outlives this reader.
    pub fn with_drop_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.dropped_lines = counter;
        self
    }

    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines.load(Ordering::Relaxed)
    }

    pub async fn next_sample(&mut self) -> Result<WeightSample, RuntimeError> {
        if self.closed {
            return Err(RuntimeError::Closed);
        }
        loop {
            let Some(line) = self.device.read_line().await? else {
                return Err(RuntimeError::Ended);
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_weight(&line) {
                Some(value) => return Ok(WeightSample::now(value)),
                None => {
                    let total = self.dropped_lines.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!(line = %line.trim(), dropped_total = total, "unparseable scale line dropped");
                }
            }
        }
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.device.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for LineReader {
    fn drop(&mut self) {
        self.close();
    }
}
