use crate::matcher::MatchError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Face bounding box in source-frame pixels, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Box without landmarks.
    pub fn new(left: f32, top: f32, right: f32, bottom: f32, confidence: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
            confidence,
            landmarks: None,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    /// Vertical extent (bottom − top).
    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// `bottom > top` and `right > left`.
    pub fn is_valid(&self) -> bool {
        self.bottom > self.top && self.right > self.left
    }
}

/// Face embedding vector. Dimensionality is defined by the extractor model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (e.g., "mobilefacenet").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Vectors of different length or with zero magnitude are not comparable.
    pub fn similarity(&self, other: &Embedding) -> Result<f32, MatchError> {
        if self.values.len() != other.values.len() {
            return Err(MatchError::DimensionMismatch {
                expected: self.values.len(),
                actual: other.values.len(),
            });
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom == 0.0 || !denom.is_finite() {
            return Err(MatchError::ZeroMagnitude);
        }
        Ok((dot / denom).clamp(-1.0, 1.0))
    }
}

/// One enrolled vector, keyed by its full entry identifier (e.g. "alice_3").
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub key: String,
    pub embedding: Embedding,
}

/// Outcome of identifying one probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Returned label: the best entry's key, or "unknown" below threshold.
    pub label: String,
    /// Best cosine similarity found [-1, 1].
    pub score: f32,
    /// Key of the best-scoring entry, kept even when the label was overridden.
    pub nearest: String,
}

impl MatchResult {
    pub fn is_unknown(&self) -> bool {
        self.label == crate::matcher::UNKNOWN_LABEL
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.4}", self.label, self.score)
    }
}
