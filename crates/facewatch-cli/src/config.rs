//! Runtime configuration for the `facewatch` binary.
//!
//! Layered as built-in defaults, an optional TOML file, `FACEWATCH_*`
//! environment variables, and finally command-line flags.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Every field has a default; flags are applied by the caller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Video source: camera index, device path, image directory or video file.
    pub source: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Detector model file name, relative to `model_dir` unless absolute.
    pub detector_model: PathBuf,
    /// Embedding model file name, relative to `model_dir` unless absolute.
    pub embedder_model: PathBuf,
    /// Persisted gallery store (JSON).
    pub gallery_path: PathBuf,
    /// Process one frame out of every `sample_every`.
    pub sample_every: u64,
    /// Faces shorter than this (pixels) bypass cropping.
    pub min_face_height: u32,
    /// Best scores below this are reported as "unknown".
    pub unknown_threshold: f32,
    /// Minimum detector score for a candidate box.
    pub detector_confidence: f32,
    /// Expected embedding length; checked when the model loads.
    pub embedding_dim: Option<usize>,
    /// TrueType/OpenType font for snapshot captions. Unset means the first
    /// system font found, or outline-only snapshots when there is none.
    pub caption_font: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: "0".to_string(),
            model_dir: facewatch_core::default_model_dir(),
            detector_model: PathBuf::from("det_10g.onnx"),
            embedder_model: PathBuf::from("mobilefacenet.onnx"),
            gallery_path: facewatch_core::default_data_dir().join("features.json"),
            sample_every: 8,
            min_face_height: facewatch_core::normalizer::DEFAULT_MIN_FACE_HEIGHT,
            unknown_threshold: facewatch_core::DEFAULT_UNKNOWN_THRESHOLD,
            detector_confidence: facewatch_core::detector::SCRFD_CONFIDENCE_THRESHOLD,
            embedding_dim: None,
            caption_font: None,
        }
    }
}

impl Config {
    /// Load from `path` (or `$FACEWATCH_CONFIG`), then apply environment
    /// overrides. With no file named, starts from the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os("FACEWATCH_CONFIG").map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `FACEWATCH_*` overrides. Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEWATCH_SOURCE") {
            self.source = v;
        }
        if let Some(v) = lookup("FACEWATCH_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEWATCH_DETECTOR_MODEL") {
            self.detector_model = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEWATCH_EMBEDDER_MODEL") {
            self.embedder_model = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEWATCH_GALLERY_PATH") {
            self.gallery_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEWATCH_CAPTION_FONT") {
            self.caption_font = Some(PathBuf::from(v));
        }
        override_parsed(&lookup, "FACEWATCH_SAMPLE_EVERY", &mut self.sample_every);
        override_parsed(&lookup, "FACEWATCH_MIN_FACE_HEIGHT", &mut self.min_face_height);
        override_parsed(&lookup, "FACEWATCH_UNKNOWN_THRESHOLD", &mut self.unknown_threshold);
        override_parsed(&lookup, "FACEWATCH_DETECTOR_CONFIDENCE", &mut self.detector_confidence);

        let mut dim = 0usize;
        override_parsed(&lookup, "FACEWATCH_EMBEDDING_DIM", &mut dim);
        if dim > 0 {
            self.embedding_dim = Some(dim);
        }
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn embedder_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.embedder_model)
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}
