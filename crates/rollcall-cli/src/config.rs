use rollcall_core::{BlinkConfig, LivenessConfig, SessionConfig, TrackerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const PROFILE_FILE: &str = "rollcall.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{key}={value:?} is not a valid value")]
    Parse { key: String, value: String },
    #[error("{key} out of range: {reason}")]
    OutOfRange { key: &'static str, reason: String },
    #[error("failed to read profile {}: {source}", .path.display())]
    ProfileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid profile {}: {source}", .path.display())]
    ProfileToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Session thresholds. Every field can come from the profile, the
/// environment, or a command-line flag, in increasing precedence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub ear_threshold: f32,
    pub consec_frames_required: u32,
    pub required_blinks: u32,
    pub time_limit_secs: f32,
    pub match_threshold: f32,
    pub tracker_min_iou: f32,
    pub tracker_max_missed_frames: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            ear_threshold: session.blink.ear_threshold,
            consec_frames_required: session.blink.consec_frames_required,
            required_blinks: session.liveness.required_blinks,
            time_limit_secs: session.liveness.time_limit.as_secs_f32(),
            match_threshold: session.match_threshold,
            tracker_min_iou: session.tracker.min_iou,
            tracker_max_missed_frames: session.tracker.max_missed_frames,
        }
    }
}

/// One day. Keeps the limit representable as a `Duration` and an `Instant` offset.
const MAX_TIME_LIMIT_SECS: f32 = 86_400.0;

impl Thresholds {
    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn out(key: &'static str, reason: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::OutOfRange { key, reason: reason.into() })
        }

        if !self.ear_threshold.is_finite() || self.ear_threshold <= 0.0 || self.ear_threshold >= 1.0 {
            return out("ear_threshold", format!("{} not in (0, 1)", self.ear_threshold));
        }
        if self.consec_frames_required == 0 {
            return out("consec_frames_required", "must be at least 1");
        }
        if self.required_blinks == 0 {
            return out("required_blinks", "must be at least 1");
        }
        if !self.time_limit_secs.is_finite() || self.time_limit_secs <= 0.0 {
            return out("time_limit_secs", format!("{} must be positive", self.time_limit_secs));
        }
        if self.time_limit_secs > MAX_TIME_LIMIT_SECS {
            return out(
                "time_limit_secs",
                format!("{} exceeds {MAX_TIME_LIMIT_SECS}", self.time_limit_secs),
            );
        }
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            return out("match_threshold", format!("{} must be positive", self.match_threshold));
        }
        if !self.tracker_min_iou.is_finite() || self.tracker_min_iou <= 0.0 || self.tracker_min_iou > 1.0 {
            return out("tracker_min_iou", format!("{} not in (0, 1]", self.tracker_min_iou));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            blink: BlinkConfig {
                ear_threshold: self.ear_threshold,
                consec_frames_required: self.consec_frames_required,
            },
            liveness: LivenessConfig {
                required_blinks: self.required_blinks,
                time_limit: Duration::from_secs_f32(self.time_limit_secs),
            },
            match_threshold: self.match_threshold,
            tracker: TrackerConfig {
                min_iou: self.tracker_min_iou,
                max_missed_frames: self.tracker_max_missed_frames,
            },
        }
    }

    fn apply_profile(&mut self, p: &Profile) {
        if let Some(v) = p.ear_threshold {
            self.ear_threshold = v;
        }
        if let Some(v) = p.consec_frames_required {
            self.consec_frames_required = v;
        }
        if let Some(v) = p.required_blinks {
            self.required_blinks = v;
        }
        if let Some(v) = p.time_limit_secs {
            self.time_limit_secs = v;
        }
        if let Some(v) = p.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = p.tracker_min_iou {
            self.tracker_min_iou = v;
        }
        if let Some(v) = p.tracker_max_missed_frames {
            self.tracker_max_missed_frames = v;
        }
    }
}

/// Per-deployment threshold overrides read from `rollcall.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Profile {
    ear_threshold: Option<f32>,
    consec_frames_required: Option<u32>,
    required_blinks: Option<u32>,
    time_limit_secs: Option<f32>,
    match_threshold: Option<f32>,
    tracker_min_iou: Option<f32>,
    tracker_max_missed_frames: Option<u32>,
}

/// CLI configuration, loaded from `ROLLCALL_*` environment variables with
/// defaults and an optional TOML profile.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Frames to discard after the camera opens (exposure settling).
    pub warmup_frames: usize,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub data_dir: PathBuf,
    /// One `{ID}_{NAME}` folder of photos per person.
    pub images_dir: PathBuf,
    pub store_path: PathBuf,
    /// Directory of daily attendance CSV files.
    pub log_dir: PathBuf,
    /// Profile that was applied, if any.
    pub profile_path: Option<PathBuf>,
    pub thresholds: Thresholds,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Load with `var` standing in for the environment.
    pub fn from_source(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = var("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir(&var));
        let model_dir = var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("models"));
        let images_dir = var("ROLLCALL_IMAGES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("images"));
        let store_path = var("ROLLCALL_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("identities.json"));
        let log_dir = var("ROLLCALL_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("attendance"));

        let mut thresholds = Thresholds::default();

        let profile_path = match var("ROLLCALL_CONFIG").map(PathBuf::from) {
            Some(explicit) => {
                thresholds.apply_profile(&read_profile(&explicit)?);
                Some(explicit)
            }
            None => {
                let implicit = data_dir.join(PROFILE_FILE);
                if implicit.is_file() {
                    thresholds.apply_profile(&read_profile(&implicit)?);
                    Some(implicit)
                } else {
                    None
                }
            }
        };

        let t = &mut thresholds;
        t.ear_threshold = env_or(&var, "ROLLCALL_EAR_THRESHOLD", t.ear_threshold)?;
        t.consec_frames_required = env_or(&var, "ROLLCALL_CONSEC_FRAMES", t.consec_frames_required)?;
        t.required_blinks = env_or(&var, "ROLLCALL_REQUIRED_BLINKS", t.required_blinks)?;
        t.time_limit_secs = env_or(&var, "ROLLCALL_TIME_LIMIT_SECS", t.time_limit_secs)?;
        t.match_threshold = env_or(&var, "ROLLCALL_MATCH_THRESHOLD", t.match_threshold)?;
        t.tracker_min_iou = env_or(&var, "ROLLCALL_TRACKER_MIN_IOU", t.tracker_min_iou)?;
        t.tracker_max_missed_frames =
            env_or(&var, "ROLLCALL_TRACKER_MAX_MISSED", t.tracker_max_missed_frames)?;
        thresholds.validate()?;

        Ok(Self {
            camera_device: var("ROLLCALL_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            camera_width: env_or(&var, "ROLLCALL_CAMERA_WIDTH", 640)?,
            camera_height: env_or(&var, "ROLLCALL_CAMERA_HEIGHT", 480)?,
            warmup_frames: env_or(&var, "ROLLCALL_WARMUP_FRAMES", 4)?,
            model_dir,
            data_dir,
            images_dir,
            store_path,
            log_dir,
            profile_path,
            thresholds,
        })
    }

    /// Path to the UltraFace detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_path("version-RFB-320.onnx")
    }

    /// Path to the 68-point landmark model.
    pub fn landmark_model_path(&self) -> String {
        self.model_path("landmarks_68.onnx")
    }

    /// Path to the face embedding model.
    pub fn embedding_model_path(&self) -> String {
        self.model_path("face_embedding.onnx")
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }
}

fn default_data_dir(var: &impl Fn(&str) -> Option<String>) -> PathBuf {
    var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn read_profile(path: &Path) -> Result<Profile, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::ProfileIo { path: path.to_path_buf(), source })?;
    let profile = toml::from_str(&text)
        .map_err(|source| ConfigError::ProfileToml { path: path.to_path_buf(), source })?;
    tracing::debug!(path = %path.display(), "profile loaded");
    Ok(profile)
}

fn env_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match var(key) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Parse {
            key: key.to_string(),
            value: v,
        }),
    }
}
