//! UltraFace face detector via ONNX Runtime.
//!
//! The RFB-320 model takes a 320x240 frame and emits, per prior box, a
//! background/face score pair and normalized corner coordinates. Priors are
//! decoded inside the exported graph, so post-processing is threshold + NMS.

use crate::geometry::iou;
use crate::imaging;
use crate::session::FaceDetector;
use crate::types::BoundingBox;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ULTRAFACE_INPUT_WIDTH: usize = 320;
const ULTRAFACE_INPUT_HEIGHT: usize = 240;
const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_STD: f32 = 128.0;
const ULTRAFACE_CONFIDENCE_THRESHOLD: f32 = 0.7;
const ULTRAFACE_NMS_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — place version-RFB-320.onnx in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    ShortFrame { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// UltraFace-based face detector.
pub struct UltraFaceDetector {
    session: Session,
    /// `(scores, boxes)` output positions, discovered by name at load time.
    output_indices: (usize, usize),
}

impl UltraFaceDetector {
    /// Load the UltraFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            "loaded UltraFace model"
        );

        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "UltraFace model requires 2 outputs (scores, boxes), got {}",
                output_names.len()
            )));
        }

        Ok(Self {
            session,
            output_indices: discover_output_indices(&output_names),
        })
    }

    fn preprocess(frame: &[u8], width: usize, height: usize) -> ndarray::Array4<f32> {
        let resized = imaging::resize_bilinear(
            frame,
            width,
            height,
            ULTRAFACE_INPUT_WIDTH,
            ULTRAFACE_INPUT_HEIGHT,
        );
        imaging::to_nchw(
            &resized,
            ULTRAFACE_INPUT_WIDTH,
            ULTRAFACE_INPUT_HEIGHT,
            3,
            ULTRAFACE_MEAN,
            ULTRAFACE_STD,
        )
    }
}

impl FaceDetector for UltraFaceDetector {
    type Error = DetectorError;

    /// Detect faces in a grayscale frame, sorted by descending confidence.
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let expected = width as usize * height as usize;
        if frame.len() < expected {
            return Err(DetectorError::ShortFrame { expected, actual: frame.len() });
        }

        let (scores_idx, boxes_idx) = self.output_indices;
        let input = Self::preprocess(frame, width as usize, height as usize);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let candidates = decode(
            scores,
            boxes,
            width as f32,
            height as f32,
            ULTRAFACE_CONFIDENCE_THRESHOLD,
        );
        Ok(nms(candidates, ULTRAFACE_NMS_THRESHOLD))
    }
}

/// Find the `scores` and `boxes` outputs by name, falling back to the
/// exported order `[scores, boxes]`.
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let scores = names.iter().position(|n| n == "scores");
    let boxes = names.iter().position(|n| n == "boxes");
    match (scores, boxes) {
        (Some(s), Some(b)) => (s, b),
        _ => {
            tracing::info!(?names, "UltraFace: output names not recognized, using positional mapping");
            (0, 1)
        }
    }
}

/// Turn raw per-prior outputs into frame-space boxes above `threshold`.
fn decode(
    scores: &[f32],
    boxes: &[f32],
    frame_w: f32,
    frame_h: f32,
    threshold: f32,
) -> Vec<BoundingBox> {
    let priors = (scores.len() / 2).min(boxes.len() / 4);
    let mut detections = Vec::new();

    for i in 0..priors {
        let score = scores[i * 2 + 1];
        if score <= threshold {
            continue;
        }
        let x1 = boxes[i * 4].clamp(0.0, 1.0) * frame_w;
        let y1 = boxes[i * 4 + 1].clamp(0.0, 1.0) * frame_h;
        let x2 = boxes[i * 4 + 2].clamp(0.0, 1.0) * frame_w;
        let y2 = boxes[i * 4 + 3].clamp(0.0, 1.0) * frame_h;
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
        });
    }

    detections
}

/// Non-maximum suppression, highest confidence first.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}
