//! Frame-synchronous attendance session.
//!
//! Each frame is processed to completion before the next is pulled:
//! detect → associate to slots → landmarks → blink update → liveness →
//! identity match → attendance write. Per slot the states are
//!
//! ```text
//! Tracking ──(blinks ≥ required)──▶ LivenessPassed ──(match)──▶ Matched
//!     │
//!     └──(time limit, global check)──▶ LivenessFailed
//! ```
//!
//! `Matched` and `LivenessFailed` are terminal. A rejected match leaves the
//! slot in `LivenessPassed` to retry on later frames.

use crate::attendance::AttendanceRecord;
use crate::blink::{BlinkConfig, BlinkTracker};
use crate::geometry::face_eye_aspect_ratio;
use crate::liveness::{LivenessConfig, LivenessGate, LivenessVerdict};
use crate::matcher::{EuclideanMatcher, Gallery, Matcher, DEFAULT_MATCH_THRESHOLD};
use crate::tracker::{SlotId, SlotTracker, TrackerConfig};
use crate::types::{BoundingBox, Embedding, FaceLandmarks};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Finds faces in a grayscale frame.
pub trait FaceDetector {
    type Error: std::error::Error + Send + Sync + 'static;

    fn detect(&mut self, frame: &[u8], width: u32, height: u32)
        -> Result<Vec<BoundingBox>, Self::Error>;
}

/// Predicts 68-point landmarks for one detected face.
pub trait LandmarkPredictor {
    type Error: std::error::Error + Send + Sync + 'static;

    fn predict(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<FaceLandmarks, Self::Error>;
}

/// Produces an embedding for one detected face. `Ok(None)` means no
/// embedding could be taken from this box.
pub trait EmbeddingExtractor {
    type Error: std::error::Error + Send + Sync + 'static;

    fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Option<Embedding>, Self::Error>;
}

/// Persists confirmed attendance.
pub trait AttendanceSink {
    type Error: std::error::Error + Send + Sync + 'static;

    fn record(&mut self, label: &str) -> Result<AttendanceRecord, Self::Error>;
}

/// An owned grayscale frame handed to the session loop.
#[derive(Debug, Clone)]
pub struct GrayFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Supplies frames to [`AttendanceSession::run`]. `Ok(None)` ends the session.
pub trait FrameSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn next_frame(&mut self) -> Result<Option<GrayFrame>, Self::Error>;
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("frame capture failed: {0}")]
    Capture(#[source] BoxError),
    #[error("face detection failed: {0}")]
    Detection(#[source] BoxError),
    #[error("attendance write failed: {0}")]
    Persistence(#[source] BoxError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub blink: BlinkConfig,
    pub liveness: LivenessConfig,
    pub match_threshold: f32,
    pub tracker: TrackerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            blink: BlinkConfig::default(),
            liveness: LivenessConfig::default(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            tracker: TrackerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Tracking,
    LivenessPassed,
    Matched { label: String },
    LivenessFailed,
}

impl SlotState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SlotState::Matched { .. } | SlotState::LivenessFailed)
    }
}

/// Per-slot session state.
#[derive(Debug, Clone)]
pub struct FaceTrack {
    blink: BlinkTracker,
    state: SlotState,
}

impl FaceTrack {
    fn new() -> Self {
        Self { blink: BlinkTracker::new(), state: SlotState::Tracking }
    }

    pub fn state(&self) -> &SlotState {
        &self.state
    }

    pub fn blink_count(&self) -> u32 {
        self.blink.blink_count()
    }

    pub fn attendance_marked(&self) -> bool {
        matches!(self.state, SlotState::Matched { .. })
    }
}

/// Something observable that happened while processing a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SlotOpened { slot: SlotId },
    SlotExpired { slot: SlotId, state: SlotState },
    LandmarksUnavailable { slot: SlotId, reason: String },
    Blink { slot: SlotId, count: u32 },
    LivenessPassed { slot: SlotId, blinks: u32 },
    LivenessFailed { slot: SlotId, blinks: u32 },
    NoEmbedding { slot: SlotId },
    Unknown { slot: SlotId, distance: f32 },
    /// `recorded` is false when this identity was already written earlier
    /// in the session through another slot.
    Matched { slot: SlotId, label: String, distance: f32, recorded: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Operator stop signal.
    Stopped,
    /// Time limit reached with at least one face still unproven.
    LivenessTimeout,
    /// Frame source has no more frames.
    SourceEnded,
}

#[derive(Debug, Clone, Default)]
pub struct FrameOutcome {
    pub faces: usize,
    pub events: Vec<SessionEvent>,
    pub stop: Option<StopReason>,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub frames: u64,
    pub reason: StopReason,
    pub matched: Vec<(SlotId, String)>,
    pub failed: Vec<SlotId>,
    pub records: Vec<AttendanceRecord>,
}

/// One attendance session. Collaborators are owned so the session can run
/// on its own thread.
pub struct AttendanceSession<D, L, E, S> {
    config: SessionConfig,
    detector: D,
    landmarks: L,
    extractor: E,
    sink: S,
    gallery: Gallery,
    tracker: SlotTracker,
    gate: LivenessGate,
    tracks: BTreeMap<SlotId, FaceTrack>,
    recorded_labels: HashSet<String>,
    frames: u64,
    matched: Vec<(SlotId, String)>,
    failed: Vec<SlotId>,
    records: Vec<AttendanceRecord>,
}

impl<D, L, E, S> AttendanceSession<D, L, E, S>
where
    D: FaceDetector,
    L: LandmarkPredictor,
    E: EmbeddingExtractor,
    S: AttendanceSink,
{
    pub fn new(
        config: SessionConfig,
        detector: D,
        landmarks: L,
        extractor: E,
        sink: S,
        gallery: Gallery,
    ) -> Self {
        if gallery.is_empty() {
            tracing::warn!("gallery is empty; every face will be reported unknown");
        }
        Self {
            tracker: SlotTracker::new(config.tracker),
            gate: LivenessGate::new(config.liveness),
            config,
            detector,
            landmarks,
            extractor,
            sink,
            gallery,
            tracks: BTreeMap::new(),
            recorded_labels: HashSet::new(),
            frames: 0,
            matched: Vec::new(),
            failed: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn track(&self, slot: SlotId) -> Option<&FaceTrack> {
        self.tracks.get(&slot)
    }

    pub fn tracks(&self) -> impl Iterator<Item = (SlotId, &FaceTrack)> {
        self.tracks.iter().map(|(id, t)| (*id, t))
    }

    pub fn gate(&self) -> &LivenessGate {
        &self.gate
    }

    pub fn extractor_mut(&mut self) -> &mut E {
        &mut self.extractor
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Process one frame captured at `now`.
    pub fn process_frame(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        now: Instant,
    ) -> Result<FrameOutcome, SessionError> {
        self.frames += 1;
        let mut events = Vec::new();

        let faces = self
            .detector
            .detect(frame, width, height)
            .map_err(|e| SessionError::Detection(Box::new(e)))?;

        if !faces.is_empty() {
            self.gate.start(now);
        }

        let association = self.tracker.associate(&faces);
        for slot in association.opened {
            tracing::debug!(slot, "face slot opened");
            self.tracks.insert(slot, FaceTrack::new());
            events.push(SessionEvent::SlotOpened { slot });
        }
        for slot in association.expired {
            if let Some(track) = self.tracks.remove(&slot) {
                tracing::debug!(slot, state = ?track.state, "face slot expired");
                events.push(SessionEvent::SlotExpired { slot, state: track.state });
            }
        }

        for (slot, face) in &association.assigned {
            let slot = *slot;
            let state = match self.tracks.get(&slot) {
                Some(track) => track.state.clone(),
                None => continue,
            };

            match state {
                SlotState::Tracking => {
                    if self.update_liveness(slot, frame, width, height, face, now, &mut events) {
                        self.try_identify(slot, frame, width, height, face, &mut events)?;
                    }
                }
                SlotState::LivenessPassed => {
                    self.try_identify(slot, frame, width, height, face, &mut events)?;
                }
                SlotState::Matched { .. } | SlotState::LivenessFailed => {}
            }
        }

        let stop = self.check_time_limit(now, &mut events);

        Ok(FrameOutcome { faces: faces.len(), events, stop })
    }

    /// Blink update and liveness evaluation for a `Tracking` slot. Returns
    /// whether the slot passed on this frame.
    #[allow(clippy::too_many_arguments)]
    fn update_liveness(
        &mut self,
        slot: SlotId,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
        now: Instant,
        events: &mut Vec<SessionEvent>,
    ) -> bool {
        let landmarks = match self.landmarks.predict(frame, width, height, face) {
            Ok(lm) => lm,
            Err(e) => {
                tracing::warn!(slot, error = %e, "landmark prediction failed; skipping face this frame");
                events.push(SessionEvent::LandmarksUnavailable { slot, reason: e.to_string() });
                return false;
            }
        };
        let ear = face_eye_aspect_ratio(&landmarks);

        let Some(track) = self.tracks.get_mut(&slot) else {
            return false;
        };
        if track.blink.update(ear, &self.config.blink) {
            let count = track.blink.blink_count();
            tracing::info!(slot, count, "blink");
            events.push(SessionEvent::Blink { slot, count });
        }

        let blinks = track.blink.blink_count();
        match self.gate.evaluate(blinks, now) {
            LivenessVerdict::Passed => {
                track.state = SlotState::LivenessPassed;
                tracing::info!(slot, blinks, "liveness passed");
                events.push(SessionEvent::LivenessPassed { slot, blinks });
                true
            }
            // Failure is applied to every unproven slot by the global check.
            LivenessVerdict::Failed | LivenessVerdict::Pending => false,
        }
    }

    /// Extract, match and, on acceptance, record attendance for a slot that
    /// has passed liveness.
    fn try_identify(
        &mut self,
        slot: SlotId,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
        events: &mut Vec<SessionEvent>,
    ) -> Result<(), SessionError> {
        let embedding = match self.extractor.extract(frame, width, height, face) {
            Ok(Some(e)) => e,
            Ok(None) => {
                tracing::debug!(slot, "no embedding for face; retrying next frame");
                events.push(SessionEvent::NoEmbedding { slot });
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(slot, error = %e, "embedding extraction failed; retrying next frame");
                events.push(SessionEvent::NoEmbedding { slot });
                return Ok(());
            }
        };

        let result = EuclideanMatcher.compare(&embedding, &self.gallery, self.config.match_threshold);
        let Some(label) = result.label.filter(|_| result.matched) else {
            tracing::info!(slot, distance = result.distance, "face not recognized");
            events.push(SessionEvent::Unknown { slot, distance: result.distance });
            return Ok(());
        };

        let recorded = if self.recorded_labels.contains(&label) {
            tracing::info!(slot, %label, "identity already recorded this session");
            false
        } else {
            let record = self
                .sink
                .record(&label)
                .map_err(|e| SessionError::Persistence(Box::new(e)))?;
            self.records.push(record);
            self.recorded_labels.insert(label.clone());
            true
        };

        if let Some(track) = self.tracks.get_mut(&slot) {
            track.state = SlotState::Matched { label: label.clone() };
        }
        tracing::info!(slot, %label, distance = result.distance, recorded, "identity matched");
        self.matched.push((slot, label.clone()));
        events.push(SessionEvent::Matched { slot, label, distance: result.distance, recorded });
        Ok(())
    }

    /// Fail every still-`Tracking` slot once the time budget is spent.
    fn check_time_limit(
        &mut self,
        now: Instant,
        events: &mut Vec<SessionEvent>,
    ) -> Option<StopReason> {
        if !self.gate.is_expired(now) {
            return None;
        }

        let mut any_failed = false;
        for (&slot, track) in self.tracks.iter_mut() {
            if track.state != SlotState::Tracking {
                continue;
            }
            let blinks = track.blink.blink_count();
            if self.gate.evaluate(blinks, now) != LivenessVerdict::Failed {
                continue;
            }
            track.state = SlotState::LivenessFailed;
            any_failed = true;
            tracing::warn!(slot, blinks, "liveness check failed");
            self.failed.push(slot);
            events.push(SessionEvent::LivenessFailed { slot, blinks });
        }

        any_failed.then_some(StopReason::LivenessTimeout)
    }

    /// Pull frames until stopped, timed out or the source ends.
    ///
    /// `stop` is polled once per frame. `on_event` sees every event as it
    /// happens.
    pub fn run<F: FrameSource>(
        &mut self,
        source: &mut F,
        stop: &AtomicBool,
        mut on_event: impl FnMut(&SessionEvent),
    ) -> Result<SessionSummary, SessionError> {
        tracing::info!(
            gallery = self.gallery.len(),
            required_blinks = self.config.liveness.required_blinks,
            time_limit_secs = self.config.liveness.time_limit.as_secs_f32(),
            "attendance session started"
        );

        let reason = loop {
            if stop.load(Ordering::Relaxed) {
                break StopReason::Stopped;
            }
            let Some(frame) = source
                .next_frame()
                .map_err(|e| SessionError::Capture(Box::new(e)))?
            else {
                break StopReason::SourceEnded;
            };

            let outcome = self.process_frame(&frame.data, frame.width, frame.height, Instant::now())?;
            for event in &outcome.events {
                on_event(event);
            }
            if let Some(reason) = outcome.stop {
                break reason;
            }
        };

        tracing::info!(
            ?reason,
            frames = self.frames,
            matched = self.matched.len(),
            failed = self.failed.len(),
            "attendance session finished"
        );
        Ok(self.summary(reason))
    }

    pub fn summary(&self, reason: StopReason) -> SessionSummary {
        SessionSummary {
            frames: self.frames,
            reason,
            matched: self.matched.clone(),
            failed: self.failed.clone(),
            records: self.records.clone(),
        }
    }
}
