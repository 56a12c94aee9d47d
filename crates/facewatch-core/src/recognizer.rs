//! Face embedding extraction via ONNX Runtime.
//!
//! Maps a normalized 112×112 RGB face crop to a fixed-length feature
//! vector using a MobileFaceNet-style recognition model.

use crate::normalizer::FACE_CROP_SIZE;
use crate::types::Embedding;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Produces an embedding for a normalized face crop.
pub trait EmbeddingExtractor {
    fn extract(&mut self, crop: &RgbImage) -> Result<Embedding, RecognizerError>;
}

impl<E: EmbeddingExtractor + ?Sized> EmbeddingExtractor for Box<E> {
    fn extract(&mut self, crop: &RgbImage) -> Result<Embedding, RecognizerError> {
        (**self).extract(crop)
    }
}

/// Scale pixels to [-1, 1] per channel: `(v / 255 - 0.5) / 0.5`.
///
/// Returns a 1×3×112×112 NCHW tensor. Crops of any other size are resized
/// first; only the uncropped small-face path produces those.
pub fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = FACE_CROP_SIZE;
    let resized;
    let crop = if crop.dimensions() == (size, size) {
        crop
    } else {
        tracing::warn!(
            width = crop.width(),
            height = crop.height(),
            "embedding input is not a {size}x{size} crop; resizing"
        );
        resized = imageops::resize(crop, size, size, FilterType::Triangle);
        &resized
    };

    let n = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, n, n));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - 0.5) / 0.5;
        }
    }
    tensor
}

/// ONNX-backed embedding extractor.
pub struct OnnxExtractor {
    session: Session,
    model_version: String,
    expected_dim: Option<usize>,
}

impl OnnxExtractor {
    /// Load the recognition model. `expected_dim` rejects outputs of any other length.
    pub fn load(model_path: &Path, expected_dim: Option<usize>) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let model_version = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            model_version = %model_version,
            "loaded embedding model"
        );

        Ok(Self {
            session,
            model_version,
            expected_dim,
        })
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn extract(&mut self, crop: &RgbImage) -> Result<Embedding, RecognizerError> {
        let input = preprocess(crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if let Some(dim) = self.expected_dim {
            if raw.len() != dim {
                return Err(RecognizerError::InferenceFailed(format!(
                    "expected {dim}-dim embedding, got {}",
                    raw.len()
                )));
            }
        }

        Ok(Embedding {
            values: raw.to_vec(),
            model_version: Some(self.model_version.clone()),
        })
    }
}
