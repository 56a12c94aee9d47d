//! facewatch-core: face normalization, identity gallery and matching.
//!
//! The pipeline per image is: [`FaceLocalizer`] → [`Normalizer`] →
//! [`EmbeddingExtractor`] → [`Matcher`]. The localizer and extractor are
//! traits so the policy code runs against stubs; SCRFD and MobileFaceNet
//! implementations run via ONNX Runtime.

pub mod detector;
pub mod enroll;
pub mod gallery;
pub mod matcher;
pub mod normalizer;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use detector::{localize, FaceLocalizer, Localization, ScrfdLocalizer, SkipReason};
pub use enroll::{EnrollReport, GalleryBuilder};
pub use gallery::{Gallery, GalleryError};
pub use matcher::{CosineMatcher, MatchError, Matcher, DEFAULT_UNKNOWN_THRESHOLD, UNKNOWN_LABEL};
pub use normalizer::{FaceCrop, NormalizedFace, Normalizer, FACE_CROP_SIZE};
pub use recognizer::{EmbeddingExtractor, OnnxExtractor};
pub use types::{BoundingBox, Embedding, GalleryEntry, MatchResult};

/// Per-user data directory: `$XDG_DATA_HOME/facewatch`, else `~/.local/share/facewatch`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facewatch")
}

/// Default directory holding the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}
