//! rollcall-core — blink-gated face attendance engine.
//!
//! Faces are tracked across frames, must blink to prove liveness, then are
//! matched against a trained gallery and written once to a daily CSV log.
//! Detection, landmark regression and embedding extraction run via ONNX
//! Runtime on the CPU.

pub mod attendance;
pub mod blink;
pub mod detector;
pub mod geometry;
pub mod imaging;
pub mod landmarks;
pub mod liveness;
pub mod matcher;
pub mod recognizer;
pub mod session;
pub mod store;
pub mod tracker;
pub mod train;
pub mod types;

pub use attendance::{AttendanceLog, AttendanceRecord};
pub use blink::{BlinkConfig, BlinkTracker};
pub use detector::UltraFaceDetector;
pub use landmarks::LandmarkModel;
pub use liveness::{LivenessConfig, LivenessGate, LivenessVerdict};
pub use matcher::{EuclideanMatcher, Gallery, MatchResult, Matcher};
pub use recognizer::FaceRecognizer;
pub use session::{
    AttendanceSession, AttendanceSink, EmbeddingExtractor, FaceDetector, FrameSource, GrayFrame,
    LandmarkPredictor, SessionConfig, SessionError, SessionEvent, SessionSummary, SlotState,
    StopReason,
};
pub use store::IdentityStore;
pub use tracker::TrackerConfig;
pub use types::{BoundingBox, Embedding, FaceLandmarks, KnownIdentity};
