// Reading stability: a load has settled once successive readings stay within
// a threshold for a minimum number of samples.

use crate::models::WeightSample;

/// Max difference between two consecutive readings that still counts as stable.
pub const STABILITY_THRESHOLD: f64 = 0.1;
/// Consecutive stable readings needed before a weight is reported stable.
pub const STABILITY_COUNT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityConfig {
    pub threshold: f64,
    pub count: u32,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            threshold: STABILITY_THRESHOLD,
            count: STABILITY_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityState {
    /// `None` until the first reading arrives.
    pub last_value: Option<f64>,
    pub consecutive_stable_count: u32,
}

impl StabilityState {
    /// No reading seen yet. The first reading opens a stable run of length 1.
    pub const fn initial() -> Self {
        Self {
            last_value: None,
            consecutive_stable_count: 0,
        }
    }
}

/// Pure step: returns the next state and whether the reading is reported stable.
///
/// A reading within `threshold` of the previous one extends the run, anything
/// else resets it to 0. `last_value` always moves to the new reading.
pub fn classify(
    config: &StabilityConfig,
    state: StabilityState,
    sample: &WeightSample,
) -> (StabilityState, bool) {
    let within = state
        .last_value
        .is_none_or(|last| (sample.value - last).abs() < config.threshold);
    let consecutive_stable_count = if within {
        state.consecutive_stable_count.saturating_add(1)
    } else {
        0
    };
    let next = StabilityState {
        last_value: Some(sample.value),
        consecutive_stable_count,
    };
    (next, consecutive_stable_count >= config.count)
}

/// Owns the state for one stream of readings.
#[derive(Debug, Clone)]
pub struct StabilityClassifier {
    config: StabilityConfig,
    state: StabilityState,
}

impl StabilityClassifier {
    pub fn new(config: StabilityConfig) -> Self {
        Self {
            config,
            state: StabilityState::initial(),
        }
    }

    pub fn observe(&mut self, sample: &WeightSample) -> bool {
        let (next, is_stable) = classify(&self.config, self.state, sample);
        self.state = next;
        is_stable
    }

    pub fn state(&self) -> StabilityState {
        self.state
    }
}
