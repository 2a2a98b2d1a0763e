//! Blink-challenge liveness gate.
//!
//! A printed photograph or a still image on a phone cannot blink. The gate
//! gives every tracked face a shared time budget, starting when the first
//! face appears, to produce the required number of blinks.
//!
//! # Threat Coverage
//!
//! - **Blocks:** printed photographs, static images held up to the camera.
//! - **Does not block:** video replay of a blinking subject, masks with
//!   cut-out eyes.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const DEFAULT_REQUIRED_BLINKS: u32 = 2;
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LivenessConfig {
    pub required_blinks: u32,
    pub time_limit: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            required_blinks: DEFAULT_REQUIRED_BLINKS,
            time_limit: DEFAULT_TIME_LIMIT,
        }
    }
}

/// Outcome of checking one face against the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessVerdict {
    /// Not enough blinks yet, time remains.
    Pending,
    /// Required blinks reached.
    Passed,
    /// Time budget spent without enough blinks.
    Failed,
}

/// Session-wide liveness clock.
#[derive(Debug, Clone)]
pub struct LivenessGate {
    config: LivenessConfig,
    started_at: Option<Instant>,
}

impl LivenessGate {
    pub fn new(config: LivenessConfig) -> Self {
        Self { config, started_at: None }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Start the clock. Later calls are no-ops.
    pub fn start(&mut self, now: Instant) {
        if self.started_at.is_none() {
            tracing::debug!(
                required_blinks = self.config.required_blinks,
                time_limit_secs = self.config.time_limit.as_secs_f32(),
                "liveness clock started"
            );
            self.started_at = Some(now);
        }
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Time since the clock started, zero before it starts.
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.started_at
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or(Duration::ZERO)
    }

    /// Whether the time budget is spent. Reaching the limit exactly counts.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.is_started() && self.elapsed(now) >= self.config.time_limit
    }

    /// Judge one face's blink count at `now`.
    ///
    /// Reaching the blink target wins over expiry within the same frame: the
    /// blinks were observed before the deadline check ran.
    pub fn evaluate(&self, blink_count: u32, now: Instant) -> LivenessVerdict {
        if blink_count >= self.config.required_blinks {
            LivenessVerdict::Passed
        } else if self.is_expired(now) {
            LivenessVerdict::Failed
        } else {
            LivenessVerdict::Pending
        }
    }
}
