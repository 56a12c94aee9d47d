//! Identity matching: nearest gallery entry by cosine similarity.

use crate::gallery::Gallery;
use crate::types::{Embedding, MatchResult};
use thiserror::Error;

/// Scores below this are reported as [`UNKNOWN_LABEL`].
pub const DEFAULT_UNKNOWN_THRESHOLD: f32 = 0.4;
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("gallery is empty")]
    EmptyGallery,
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding has zero magnitude")]
    ZeroMagnitude,
}

/// Strategy for comparing a probe embedding against the enrolled gallery.
pub trait Matcher {
    fn identify(&self, probe: &Embedding, gallery: &Gallery) -> Result<MatchResult, MatchError>;
}

/// Linear-scan cosine matcher with an "unknown" rejection threshold.
///
/// Every entry is scored in gallery insertion order; on equal scores the
/// entry scanned first wins.
#[derive(Debug, Clone, Copy)]
pub struct CosineMatcher {
    pub threshold: f32,
}

impl CosineMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for CosineMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_UNKNOWN_THRESHOLD)
    }
}

impl Matcher for CosineMatcher {
    fn identify(&self, probe: &Embedding, gallery: &Gallery) -> Result<MatchResult, MatchError> {
        let mut best: Option<(f32, &str)> = None;

        for entry in gallery.iter() {
            let sim = probe.similarity(&entry.embedding)?;
            match best {
                Some((best_sim, _)) if sim <= best_sim => {}
                _ => best = Some((sim, entry.key.as_str())),
            }
        }

        let (score, nearest) = best.ok_or(MatchError::EmptyGallery)?;
        tracing::debug!(nearest, score, "best gallery match");

        let label = if score < self.threshold {
            UNKNOWN_LABEL.to_string()
        } else {
            nearest.to_string()
        };

        Ok(MatchResult {
            label,
            score,
            nearest: nearest.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit vector at `angle` radians; cosine against [1, 0] is cos(angle).
    fn at_cosine(cos: f32) -> Embedding {
        let sin = (1.0 - cos * cos).max(0.0).sqrt();
        Embedding::new(vec![cos, sin])
    }

    fn gallery_of(entries: &[(&str, Embedding)]) -> Gallery {
        let mut gallery = Gallery::new();
        for (key, emb) in entries {
            gallery.insert(*key, emb.clone()).unwrap();
        }
        gallery
    }

    #[test]
    fn test_identical_embedding_matches_itself() {
        let emb = Embedding::new(vec![0.1, 0.7, -0.3, 0.9]);
        let gallery = gallery_of(&[
            ("other_0", Embedding::new(vec![-0.5, 0.2, 0.8, 0.1])),
            ("alice_0", emb.clone()),
        ]);

        let result = CosineMatcher::default().identify(&emb, &gallery).unwrap();
        assert_eq!(result.label, "alice_0");
        assert!((result.score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_below_threshold_is_unknown() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = gallery_of(&[("A", at_cosine(0.35)), ("B", at_cosine(0.10))]);

        let result = CosineMatcher::default().identify(&probe, &gallery).unwrap();
        assert_eq!(result.label, UNKNOWN_LABEL);
        assert!(result.is_unknown());
        assert!((result.score - 0.35).abs() < 1e-5);
        assert_eq!(result.nearest, "A");
    }

    #[test]
    fn test_above_threshold_returns_best_label() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = gallery_of(&[("A", at_cosine(0.6)), ("B", at_cosine(0.8))]);

        let result = CosineMatcher::default().identify(&probe, &gallery).unwrap();
        assert_eq!(result.label, "B");
        assert!((result.score - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = gallery_of(&[("A", Embedding::new(vec![1.0, 0.0]))]);

        let result = CosineMatcher::new(1.0).identify(&probe, &gallery).unwrap();
        assert_eq!(result.label, "A");
    }

    #[test]
    fn test_tie_first_seen_wins() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = gallery_of(&[
            ("first", Embedding::new(vec![2.0, 0.0, 0.0])),
            ("second", Embedding::new(vec![1.0, 0.0, 0.0])),
        ]);

        let result = CosineMatcher::default().identify(&probe, &gallery).unwrap();
        assert_eq!(result.label, "first");
    }

    #[test]
    fn test_scans_every_entry() {
        // Best match is the last entry.
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = gallery_of(&[
            ("decoy1", Embedding::new(vec![0.0, 1.0, 0.0])),
            ("decoy2", Embedding::new(vec![0.0, 0.0, 1.0])),
            ("match", Embedding::new(vec![1.0, 0.0, 0.0])),
        ]);

        let result = CosineMatcher::default().identify(&probe, &gallery).unwrap();
        assert_eq!(result.label, "match");
    }

    #[test]
    fn test_negative_scores_still_tracked() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = gallery_of(&[
            ("far", Embedding::new(vec![-1.0, 0.0])),
            ("less_far", Embedding::new(vec![-1.0, 1.0])),
        ]);

        let result = CosineMatcher::default().identify(&probe, &gallery).unwrap();
        assert!(result.is_unknown());
        assert_eq!(result.nearest, "less_far");
        assert!(result.score < 0.0);
    }

    #[test]
    fn test_empty_gallery() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let result = CosineMatcher::default().identify(&probe, &Gallery::new());
        assert_eq!(result, Err(MatchError::EmptyGallery));
    }

    #[test]
    fn test_zero_probe_is_rejected() {
        let gallery = gallery_of(&[("A", Embedding::new(vec![1.0, 0.0]))]);
        let result = CosineMatcher::default().identify(&Embedding::new(vec![0.0, 0.0]), &gallery);
        assert_eq!(result, Err(MatchError::ZeroMagnitude));
    }
}
