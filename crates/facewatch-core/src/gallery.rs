//! Identity gallery: ordered (key → embedding) entries plus the JSON store.
//!
//! The persisted store is a single JSON object mapping entry keys to
//! numeric vectors. Key order in the file is preserved on load and save,
//! so matching tie-breaks stay deterministic across runs.

use crate::types::{Embedding, GalleryEntry};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to read gallery store {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write gallery store {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed gallery store {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("entry {key:?}: dimension {actual} does not match gallery dimension {expected}")]
    DimensionMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },
    #[error("entry {0:?} has a zero-magnitude embedding")]
    ZeroMagnitude(String),
    #[error("cannot read enrollment directory {path}: {source}")]
    EnrollDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Enrolled identities, iterated in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. An existing key is overwritten in place and keeps its
    /// scan position; a new key is appended.
    pub fn insert(&mut self, key: impl Into<String>, embedding: Embedding) -> Result<(), GalleryError> {
        let key = key.into();

        if embedding.norm() == 0.0 {
            return Err(GalleryError::ZeroMagnitude(key));
        }
        if let Some(expected) = self.dim() {
            // A lone entry being replaced may change the dimension.
            let replacing_only = self.entries.len() == 1 && self.entries[0].key == key;
            if embedding.dim() != expected && !replacing_only {
                return Err(GalleryError::DimensionMismatch {
                    key,
                    expected,
                    actual: embedding.dim(),
                });
            }
        }

        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(existing) => existing.embedding = embedding,
            None => self.entries.push(GalleryEntry { key, embedding }),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Embedding> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| &e.embedding)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GalleryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding dimension shared by every entry, `None` when empty.
    pub fn dim(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.dim())
    }

    /// Insert every entry of `other`, in its order.
    pub fn merge(&mut self, other: Gallery) -> Result<(), GalleryError> {
        for entry in other.entries {
            self.insert(entry.key, entry.embedding)?;
        }
        Ok(())
    }

    /// Load a persisted store. A missing file yields an empty gallery.
    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "gallery store not found; starting empty");
            return Ok(Self::new());
        }

        let raw = std::fs::read_to_string(path).map_err(|source| GalleryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let gallery = Self::from_json(&raw).map_err(|e| match e {
            GalleryError::Malformed { source, .. } => GalleryError::Malformed {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;

        tracing::info!(
            path = %path.display(),
            entries = gallery.len(),
            dim = ?gallery.dim(),
            "loaded gallery store"
        );
        Ok(gallery)
    }

    /// Write the gallery as a JSON object, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), GalleryError> {
        let write_err = |source| GalleryError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
        }
        std::fs::write(path, self.to_json()).map_err(write_err)?;
        tracing::info!(path = %path.display(), entries = self.len(), "saved gallery store");
        Ok(())
    }

    fn from_json(raw: &str) -> Result<Self, GalleryError> {
        let malformed = |source| GalleryError::Malformed {
            path: PathBuf::new(),
            source,
        };
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(raw).map_err(malformed)?;

        let mut gallery = Self::new();
        for (key, value) in map {
            let values: Vec<f32> = serde_json::from_value(value).map_err(malformed)?;
            gallery.insert(key, Embedding::new(values))?;
        }
        Ok(gallery)
    }

    fn to_json(&self) -> String {
        let map: serde_json::Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|e| (e.key.clone(), serde_json::json!(e.embedding.values)))
            .collect();
        serde_json::Value::Object(map).to_string()
    }
}
