// Simulated scale: one random reading per interval, exposed through the same
// device contract as a serial port so it can stand in for real hardware.

use crate::line_reader::{DeviceOpener, LineDevice, OpenError, RuntimeError};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy)]
pub struct SimulatedOpener {
    pub interval: Duration,
    pub min_weight: f64,
    pub max_weight: f64,
}

impl DeviceOpener for SimulatedOpener {
    fn open(&self, address: &str, _baud_rate: u32) -> Result<Box<dyn LineDevice>, OpenError> {
        let valid_range = self.min_weight < self.max_weight;
        if !valid_range || self.interval.is_zero() {
            return Err(OpenError::InvalidSettings {
                path: address.to_string(),
                message: format!(
                    "weight range {}..{} every {:?}",
                    self.min_weight, self.max_weight, self.interval
                ),
            });
        }
        tracing::info!(
            path = address,
            min_weight = self.min_weight,
            max_weight = self.max_weight,
            "simulated scale opened"
        );
        Ok(Box::new(SimulatedDevice {
            settings: *self,
            tick: None,
            rng: StdRng::from_entropy(),
            closed: false,
        }))
    }
}

struct SimulatedDevice {
    settings: SimulatedOpener,
    // Created on first read so opening does not need a running timer.
    tick: Option<Interval>,
    rng: StdRng,
    closed: bool,
}

#[async_trait]
impl LineDevice for SimulatedDevice {
    async fn read_line(&mut self) -> Result<Option<String>, RuntimeError> {
        if self.closed {
            return Err(RuntimeError::Closed);
        }
        let interval = self.settings.interval;
        let tick = self.tick.get_or_insert_with(|| {
            let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tick
        });
        tick.tick().await;
        let weight = self
            .rng
            .gen_range(self.settings.min_weight..self.settings.max_weight)
            .floor();
        Ok(Some(format!("{weight}\r\n")))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
