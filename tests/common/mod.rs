// Shared test helpers
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use weighbridge::config::AppConfig;
use weighbridge::line_reader::{DeviceOpener, LineDevice, OpenError, RuntimeError};
use weighbridge::models::{ChannelEvent, WeightView};

pub const TEST_CONFIG: &str = r#"
[server]
port = 8081
host = "127.0.0.1"

[scale]
path = "/dev/ttyTEST0"

[publishing]
broadcast_capacity = 64

[monitoring]
stats_log_interval_secs = 60
"#;

pub fn test_app_config() -> AppConfig {
    AppConfig::load_from_str(TEST_CONFIG).unwrap()
}

/// In-memory device opener that counts opens and closes.
#[derive(Default)]
pub struct FakeOpener {
    script: Vec<String>,
    end_after_script: bool,
    feed: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    failing_opens: AtomicUsize,
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl FakeOpener {
    /// Replays `lines` on every open, then waits forever.
    pub fn scripted(lines: &[&str]) -> Self {
        Self {
            script: lines.iter().map(|l| l.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Replays `lines` on every open, then reports end of stream.
    pub fn ending(lines: &[&str]) -> Self {
        Self {
            end_after_script: true,
            ..Self::scripted(lines)
        }
    }

    /// First device opened reads lines pushed through the returned sender.
    /// Dropping the sender ends the stream.
    pub fn fed() -> (Self, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let opener = Self {
            feed: Mutex::new(Some(rx)),
            ..Self::default()
        };
        (opener, tx)
    }

    /// The next `n` opens fail with `NotFound`.
    pub fn failing(self, n: usize) -> Self {
        self.failing_opens.store(n, Ordering::SeqCst);
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl DeviceOpener for FakeOpener {
    fn open(&self, address: &str, _baud_rate: u32) -> Result<Box<dyn LineDevice>, OpenError> {
        let failed = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(OpenError::NotFound {
                path: address.to_string(),
                message: "no such device".into(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDevice {
            lines: self.script.iter().cloned().collect(),
            end_after_script: self.end_after_script,
            feed: self.feed.lock().unwrap().take(),
            closes: self.closes.clone(),
        }))
    }
}

struct FakeDevice {
    lines: VecDeque<String>,
    end_after_script: bool,
    feed: Option<mpsc::UnboundedReceiver<String>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl LineDevice for FakeDevice {
    async fn read_line(&mut self) -> Result<Option<String>, RuntimeError> {
        if let Some(line) = self.lines.pop_front() {
            return Ok(Some(line));
        }
        if let Some(feed) = self.feed.as_mut() {
            return Ok(feed.recv().await);
        }
        if self.end_after_script {
            return Ok(None);
        }
        std::future::pending().await
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Receives the next event or fails the test after two seconds.
pub async fn next_event<F>(recv: F) -> ChannelEvent
where
    F: std::future::Future<Output = Option<ChannelEvent>>,
{
    tokio::time::timeout(std::time::Duration::from_secs(2), recv)
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

/// Waits until the published view satisfies `pred`, failing the test after two seconds.
pub async fn wait_for_view(
    rx: &mut tokio::sync::watch::Receiver<WeightView>,
    pred: impl Fn(&WeightView) -> bool,
) -> WeightView {
    tokio::time::timeout(std::time::Duration::from_secs(2), rx.wait_for(|v| pred(v)))
        .await
        .expect("timed out waiting for view")
        .expect("aggregator stopped")
        .clone()
}
