//! Gallery construction: persisted store plus enrollment from sample images.

use crate::detector::{localize, FaceLocalizer, Localization};
use crate::gallery::{Gallery, GalleryError};
use crate::normalizer::Normalizer;
use crate::recognizer::EmbeddingExtractor;
use std::path::{Path, PathBuf};

/// Outcome of enrolling one directory of sample images.
#[derive(Debug, Default)]
pub struct EnrollReport {
    pub attempted: usize,
    pub enrolled: usize,
    /// Files that produced no entry, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Builds the gallery once at startup. Owns the localizer and extractor for
/// the enrollment phase; [`build`](Self::build) hands the gallery over and
/// returns the collaborators for reuse by the recognition loop.
pub struct GalleryBuilder<L, E> {
    localizer: L,
    extractor: E,
    normalizer: Normalizer,
    gallery: Gallery,
}

impl<L: FaceLocalizer, E: EmbeddingExtractor> GalleryBuilder<L, E> {
    pub fn new(localizer: L, extractor: E, normalizer: Normalizer) -> Self {
        Self {
            localizer,
            extractor,
            normalizer,
            gallery: Gallery::new(),
        }
    }

    /// Merge the entries of a persisted store (missing store = no entries).
    pub fn with_store(mut self, path: &Path) -> Result<Self, GalleryError> {
        let stored = Gallery::load(path)?;
        self.gallery.merge(stored)?;
        Ok(self)
    }

    /// Enroll every image in `dir` under `"{label}_{index}"`.
    ///
    /// Files are visited in file-name order and `index` is the position in
    /// that listing, so failed files leave gaps in the numbering. Any
    /// per-file failure skips that file only.
    pub fn enroll(&mut self, label: &str, dir: &Path) -> Result<EnrollReport, GalleryError> {
        let enroll_dir_err = |source| GalleryError::EnrollDir {
            path: dir.to_path_buf(),
            source,
        };
        let mut files = std::fs::read_dir(dir)
            .map_err(enroll_dir_err)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(enroll_dir_err)?;
        files.retain(|p| p.is_file());
        files.sort();

        let mut report = EnrollReport {
            attempted: files.len(),
            ..Default::default()
        };

        for (idx, path) in files.into_iter().enumerate() {
            match self.enroll_one(label, idx, &path) {
                Ok(key) => {
                    tracing::debug!(key = %key, path = %path.display(), "enrolled sample");
                    report.enrolled += 1;
                }
                Err(reason) => {
                    tracing::debug!(path = %path.display(), %reason, "skipping enrollment sample");
                    report.skipped.push((path, reason));
                }
            }
        }

        tracing::info!(
            label,
            dir = %dir.display(),
            enrolled = report.enrolled,
            attempted = report.attempted,
            "enrollment finished"
        );
        Ok(report)
    }

    fn enroll_one(&mut self, label: &str, idx: usize, path: &Path) -> Result<String, String> {
        let image = image::open(path).map_err(|e| format!("decode: {e}"))?.to_rgb8();

        let boxes = match localize(&mut self.localizer, &image) {
            Localization::Found(boxes) => boxes,
            Localization::Missed(reason) => return Err(reason.to_string()),
        };

        let face = self
            .normalizer
            .normalize(&image, &boxes)
            .map_err(|e| e.to_string())?;
        let embedding = self
            .extractor
            .extract(face.crop.image())
            .map_err(|e| e.to_string())?;

        let key = format!("{label}_{idx}");
        self.gallery
            .insert(key.clone(), embedding)
            .map_err(|e| e.to_string())?;
        Ok(key)
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    /// Finish the enrollment phase.
    pub fn build(self) -> (Gallery, L, E) {
        (self.gallery, self.localizer, self.extractor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use crate::recognizer::RecognizerError;
    use crate::types::{BoundingBox, Embedding};
    use image::RgbImage;

    /// Top-left pixel decides: black = no face, red = detector error, else one face.
    struct MarkerLocalizer;

    impl FaceLocalizer for MarkerLocalizer {
        fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            match image.get_pixel(0, 0).0 {
                [0, 0, 0] => Ok(vec![]),
                [255, 0, 0] => Err(DetectorError::InferenceFailed("boom".into())),
                _ => Ok(vec![BoundingBox::new(10.0, 10.0, 90.0, 90.0, 0.9)]),
            }
        }
    }

    /// Embedding derived from the mean intensity of the crop.
    struct MeanExtractor;

    impl EmbeddingExtractor for MeanExtractor {
        fn extract(&mut self, crop: &RgbImage) -> Result<Embedding, RecognizerError> {
            let pixels = (crop.width() * crop.height()) as f32;
            let mean = crop.pixels().map(|p| p.0[1] as f32).sum::<f32>() / pixels;
            Ok(Embedding::new(vec![1.0, mean / 255.0]))
        }
    }

    fn write_image(dir: &Path, name: &str, marker: [u8; 3]) {
        let mut img = RgbImage::from_pixel(100, 100, image::Rgb([40, 120, 200]));
        img.put_pixel(0, 0, image::Rgb(marker));
        img.save(dir.join(name)).unwrap();
    }

    fn builder() -> GalleryBuilder<MarkerLocalizer, MeanExtractor> {
        GalleryBuilder::new(MarkerLocalizer, MeanExtractor, Normalizer::default())
    }

    #[test]
    fn test_enroll_skips_failed_samples() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png", [9, 9, 9]);
        write_image(dir.path(), "b.png", [0, 0, 0]); // no face
        write_image(dir.path(), "c.png", [9, 9, 9]);
        write_image(dir.path(), "d.png", [255, 0, 0]); // detector error
        write_image(dir.path(), "e.png", [9, 9, 9]);
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let mut b = builder();
        let report = b.enroll("me", dir.path()).unwrap();

        assert_eq!(report.attempted, 6);
        assert_eq!(report.enrolled, 3);
        assert_eq!(report.skipped.len(), 3);

        let keys: Vec<_> = b.gallery().iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, ["me_0", "me_2", "me_4"]);
    }

    #[test]
    fn test_enroll_nothing_usable_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png", [0, 0, 0]);

        let mut b = builder();
        let report = b.enroll("me", dir.path()).unwrap();
        assert_eq!(report.enrolled, 0);
        assert!(b.gallery().is_empty());
    }

    #[test]
    fn test_enroll_merges_with_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("features.json");
        std::fs::write(&store, r#"{"stored_0": [0.5, 0.5]}"#).unwrap();

        let samples = dir.path().join("samples");
        std::fs::create_dir(&samples).unwrap();
        write_image(&samples, "one.jpg", [9, 9, 9]);

        let mut b = builder().with_store(&store).unwrap();
        b.enroll("you", &samples).unwrap();
        let (gallery, _, _) = b.build();

        let keys: Vec<_> = gallery.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["stored_0", "you_0"]);
    }

    #[test]
    fn test_enroll_twice_keeps_distinct_labels() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png", [9, 9, 9]);
        write_image(dir.path(), "b.png", [9, 9, 9]);

        let mut b = builder();
        b.enroll("ann", dir.path()).unwrap();
        b.enroll("bob", dir.path()).unwrap();
        assert_eq!(b.gallery().len(), 4);
    }

    #[test]
    fn test_enroll_missing_dir() {
        let mut b = builder();
        let result = b.enroll("me", Path::new("/nonexistent/facewatch/samples"));
        assert!(matches!(result, Err(GalleryError::EnrollDir { .. })));
    }
}
