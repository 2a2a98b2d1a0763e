//! Blink detection from per-frame eye aspect ratio.
//!
//! A blink is counted only after the eyes stay closed for a run of
//! consecutive frames and then reopen. Single-frame dips (landmark jitter,
//! motion blur) never reach the required run length and are discarded.

use serde::{Deserialize, Serialize};

/// EAR below which an eye is considered closed.
pub const DEFAULT_EAR_THRESHOLD: f32 = 0.22;
/// Closed frames needed before a reopening counts as a blink.
pub const DEFAULT_CONSEC_FRAMES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlinkConfig {
    pub ear_threshold: f32,
    pub consec_frames_required: u32,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            ear_threshold: DEFAULT_EAR_THRESHOLD,
            consec_frames_required: DEFAULT_CONSEC_FRAMES,
        }
    }
}

/// Per-face blink counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlinkTracker {
    consecutive_low_ear_frames: u32,
    blink_count: u32,
}

impl BlinkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame's EAR. Returns `true` when this frame commits a blink.
    pub fn update(&mut self, ear: f32, config: &BlinkConfig) -> bool {
        if ear < config.ear_threshold {
            self.consecutive_low_ear_frames = self.consecutive_low_ear_frames.saturating_add(1);
            return false;
        }

        let committed = self.consecutive_low_ear_frames >= config.consec_frames_required;
        if committed {
            self.blink_count = self.blink_count.saturating_add(1);
        }
        self.consecutive_low_ear_frames = 0;
        committed
    }

    pub fn blink_count(&self) -> u32 {
        self.blink_count
    }

    pub fn consecutive_low_ear_frames(&self) -> u32 {
        self.consecutive_low_ear_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPEN: f32 = 0.30;
    const CLOSED: f32 = 0.10;

    fn feed(tracker: &mut BlinkTracker, config: &BlinkConfig, ears: &[f32]) -> u32 {
        ears.iter().filter(|&&e| tracker.update(e, config)).count() as u32
    }

    #[test]
    fn test_exact_run_then_open_is_one_blink() {
        let config = BlinkConfig::default();
        let mut t = BlinkTracker::new();
        let committed = feed(&mut t, &config, &[CLOSED, CLOSED, CLOSED, OPEN]);
        assert_eq!(committed, 1);
        assert_eq!(t.blink_count(), 1);
        assert_eq!(t.consecutive_low_ear_frames(), 0);
    }

    #[test]
    fn test_short_run_is_not_a_blink() {
        let config = BlinkConfig::default();
        let mut t = BlinkTracker::new();
        feed(&mut t, &config, &[CLOSED, CLOSED, OPEN]);
        assert_eq!(t.blink_count(), 0);
        assert_eq!(t.consecutive_low_ear_frames(), 0);
    }

    #[test]
    fn test_blink_committed_on_reopen_not_on_close() {
        let config = BlinkConfig::default();
        let mut t = BlinkTracker::new();
        feed(&mut t, &config, &[CLOSED; 10]);
        assert_eq!(t.blink_count(), 0);
        assert_eq!(t.consecutive_low_ear_frames(), 10);
        assert!(t.update(OPEN, &config));
        assert_eq!(t.blink_count(), 1);
    }

    #[test]
    fn test_custom_run_length() {
        for k in 1..6u32 {
            let config = BlinkConfig { consec_frames_required: k, ..BlinkConfig::default() };

            let mut exact = BlinkTracker::new();
            let mut seq = vec![CLOSED; k as usize];
            seq.push(OPEN);
            feed(&mut exact, &config, &seq);
            assert_eq!(exact.blink_count(), 1, "k={k}");

            let mut short = BlinkTracker::new();
            let mut seq = vec![CLOSED; (k - 1) as usize];
            seq.push(OPEN);
            feed(&mut short, &config, &seq);
            assert_eq!(short.blink_count(), 0, "k={k}");
        }
    }

    #[test]
    fn test_threshold_is_strict() {
        let config = BlinkConfig::default();
        let mut t = BlinkTracker::new();
        // EAR equal to the threshold counts as open
        feed(&mut t, &config, &[DEFAULT_EAR_THRESHOLD; 5]);
        assert_eq!(t.consecutive_low_ear_frames(), 0);
        assert_eq!(t.blink_count(), 0);
    }

    #[test]
    fn test_blink_count_monotonic() {
        let config = BlinkConfig::default();
        let mut t = BlinkTracker::new();
        let pattern = [
            CLOSED, OPEN, CLOSED, CLOSED, CLOSED, OPEN, OPEN, CLOSED, CLOSED, OPEN, CLOSED,
            CLOSED, CLOSED, CLOSED, OPEN, CLOSED,
        ];
        let mut last = 0;
        for ear in pattern {
            t.update(ear, &config);
            assert!(t.blink_count() >= last);
            last = t.blink_count();
        }
        assert_eq!(t.blink_count(), 2);
    }
}
