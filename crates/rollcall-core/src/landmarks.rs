//! 68-point facial landmark regression via ONNX Runtime.
//!
//! Expects a PFLD-style model: a 112x112 face crop in, 136 values out
//! (x, y pairs normalized to the crop). Models that also export auxiliary
//! heads (head pose) are accepted; the 136-element output is located at
//! inference time.

use crate::imaging;
use crate::session::LandmarkPredictor;
use crate::types::{BoundingBox, FaceLandmarks, LANDMARK_COUNT};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: usize = 112;
const LANDMARK_MEAN: f32 = 0.0;
const LANDMARK_STD: f32 = 255.0;
const LANDMARK_OUTPUT_LEN: usize = LANDMARK_COUNT * 2;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("landmark model not found: {0} — place landmarks_68.onnx in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct LandmarkModel {
    session: Session,
}

impl LandmarkModel {
    /// Load the landmark ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, LandmarkError> {
        if !Path::new(model_path).exists() {
            return Err(LandmarkError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded landmark model"
        );

        Ok(Self { session })
    }
}

impl LandmarkPredictor for LandmarkModel {
    type Error = LandmarkError;

    fn predict(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<FaceLandmarks, LandmarkError> {
        let crop = imaging::crop_square(frame, width, height, face, LANDMARK_INPUT_SIZE)
            .ok_or(LandmarkError::EmptyCrop)?;
        let input = imaging::to_nchw(
            &crop.pixels,
            LANDMARK_INPUT_SIZE,
            LANDMARK_INPUT_SIZE,
            3,
            LANDMARK_MEAN,
            LANDMARK_STD,
        );

        let output_count = self.session.outputs().len();
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut raw: Option<Vec<f32>> = None;
        for i in 0..output_count {
            if let Ok((_, data)) = outputs[i].try_extract_tensor::<f32>() {
                if data.len() == LANDMARK_OUTPUT_LEN {
                    raw = Some(data.to_vec());
                    break;
                }
            }
        }
        let raw = raw.ok_or_else(|| {
            LandmarkError::InferenceFailed(format!(
                "no output with {LANDMARK_OUTPUT_LEN} values"
            ))
        })?;

        decode(&raw, &crop)
    }
}

fn decode(raw: &[f32], crop: &imaging::Crop) -> Result<FaceLandmarks, LandmarkError> {
    let points = raw
        .chunks_exact(2)
        .map(|xy| crop.to_frame(xy[0], xy[1]))
        .collect();
    FaceLandmarks::new(points).ok_or_else(|| {
        LandmarkError::InferenceFailed(format!("expected {LANDMARK_COUNT} points, got {}", raw.len() / 2))
    })
}
