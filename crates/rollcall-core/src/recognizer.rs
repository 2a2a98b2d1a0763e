//! Face embedding extraction via ONNX Runtime.
//!
//! Crops the detected face, resizes it to the model's 112x112 input and
//! returns the L2-normalized output vector.

use crate::imaging;
use crate::session::EmbeddingExtractor;
use crate::types::{BoundingBox, Embedding};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMBED_INPUT_SIZE: usize = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — place face_embedding.onnx in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Embedding model wrapper.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the embedding ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session })
    }

    /// Length of the vectors this model produces, found by running one
    /// mid-gray crop through it.
    pub fn embedding_dim(&mut self) -> Result<usize, RecognizerError> {
        let blank = vec![128u8; EMBED_INPUT_SIZE * EMBED_INPUT_SIZE];
        let input = Self::preprocess(&blank);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;
        Ok(raw_data.len())
    }

    fn preprocess(face_crop: &[u8]) -> Array4<f32> {
        imaging::to_nchw(face_crop, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE, 3, EMBED_MEAN, EMBED_STD)
    }
}

impl EmbeddingExtractor for FaceRecognizer {
    type Error = RecognizerError;

    fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Option<Embedding>, RecognizerError> {
        let Some(crop) = imaging::crop_square(frame, width, height, face, EMBED_INPUT_SIZE) else {
            tracing::debug!(?face, "face box outside frame; no embedding");
            return Ok(None);
        };

        let input = Self::preprocess(&crop.pixels);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        normalize(raw_data.to_vec()).map(Some)
    }
}

/// L2-normalize a raw model output.
fn normalize(raw: Vec<f32>) -> Result<Embedding, RecognizerError> {
    if raw.is_empty() {
        return Err(RecognizerError::InferenceFailed("empty embedding".into()));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(RecognizerError::InferenceFailed("embedding contains NaN/Inf".into()));
    }

    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    let values = if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    };
    Ok(Embedding::new(values))
}
