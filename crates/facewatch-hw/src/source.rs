//! Frame sources: the trait the stream controller reads from, plus the
//! image-sequence source and source selection from a CLI string.

use crate::camera::Camera;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to open video source {spec}: {reason}")]
    OpenFailure { spec: String, reason: String },
    #[error("frame read failed: {0}")]
    ReadFailure(String),
    #[error("unsupported video source {0} (video files need the `ffmpeg` feature)")]
    Unsupported(String),
}

/// An ordered sequence of RGB frames.
///
/// `Ok(None)` means the source is exhausted. An `Err` is a failure to read
/// or decode the current frame. Resources are released on drop.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Still images played back in file-name order as a finite video.
pub struct ImageSequence {
    files: std::vec::IntoIter<PathBuf>,
    origin: PathBuf,
    total: usize,
}

impl ImageSequence {
    /// Every file in `dir` whose extension names an image format.
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        let open_err = |reason: String| SourceError::OpenFailure {
            spec: dir.display().to_string(),
            reason,
        };
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| open_err(e.to_string()))? {
            let path = entry.map_err(|e| open_err(e.to_string()))?.path();
            if path.is_file() && image::ImageFormat::from_path(&path).is_ok() {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(open_err("no image files".to_string()));
        }
        Ok(Self::from_files(dir, files))
    }

    /// Play back `files` in the given order.
    pub fn from_files(origin: &Path, files: Vec<PathBuf>) -> Self {
        tracing::debug!(origin = %origin.display(), frames = files.len(), "image sequence");
        Self {
            total: files.len(),
            files: files.into_iter(),
            origin: origin.to_path_buf(),
        }
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        let Some(path) = self.files.next() else {
            return Ok(None);
        };
        let img = image::open(&path)
            .map_err(|e| SourceError::ReadFailure(format!("{}: {e}", path.display())))?;
        Ok(Some(img.to_rgb8()))
    }

    fn describe(&self) -> String {
        format!("{} ({} images)", self.origin.display(), self.total)
    }
}

/// Open a source from its command-line form.
///
/// - `"2"`: camera `/dev/video2`
/// - `"/dev/..."`: camera by device path
/// - a directory: image sequence
/// - an image file: one-frame sequence
/// - any other file: decoded video (`ffmpeg` feature)
pub fn open_source(spec: &str) -> Result<Box<dyn FrameSource>, SourceError> {
    let open_err = |reason: String| SourceError::OpenFailure {
        spec: spec.to_string(),
        reason,
    };

    if let Ok(index) = spec.parse::<u32>() {
        let camera = Camera::open_index(index).map_err(|e| open_err(e.to_string()))?;
        return Ok(Box::new(camera));
    }
    if spec.starts_with("/dev/") {
        let camera = Camera::open(spec).map_err(|e| open_err(e.to_string()))?;
        return Ok(Box::new(camera));
    }

    let path = Path::new(spec);
    if path.is_dir() {
        return Ok(Box::new(ImageSequence::open(path)?));
    }
    if !path.is_file() {
        return Err(open_err("no such file or directory".to_string()));
    }
    if image::ImageFormat::from_path(path).is_ok() {
        return Ok(Box::new(ImageSequence::from_files(path, vec![path.to_path_buf()])));
    }
    open_video_file(path)
}

#[cfg(feature = "ffmpeg")]
fn open_video_file(path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
    Ok(Box::new(crate::ffmpeg::FfmpegSource::open(path)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_video_file(path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
    Err(SourceError::Unsupported(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(dir: &Path, name: &str, shade: u8) {
        RgbImage::from_pixel(8, 6, image::Rgb([shade, shade, shade]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_image_sequence_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "frame_002.png", 20);
        write_png(dir.path(), "frame_001.png", 10);
        std::fs::write(dir.path().join("README"), "skip me").unwrap();

        let mut seq = ImageSequence::open(dir.path()).unwrap();
        assert_eq!(seq.next_frame().unwrap().unwrap().get_pixel(0, 0).0, [10, 10, 10]);
        assert_eq!(seq.next_frame().unwrap().unwrap().get_pixel(0, 0).0, [20, 20, 20]);
        assert!(seq.next_frame().unwrap().is_none());
        assert!(seq.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_image_sequence_corrupt_frame_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();

        let mut seq = ImageSequence::open(dir.path()).unwrap();
        assert!(matches!(seq.next_frame(), Err(SourceError::ReadFailure(_))));
    }

    #[test]
    fn test_image_sequence_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequence::open(dir.path()),
            Err(SourceError::OpenFailure { .. })
        ));
    }

    #[test]
    fn test_open_source_directory_and_single_image() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a.png", 1);

        let mut from_dir = open_source(dir.path().to_str().unwrap()).unwrap();
        assert!(from_dir.next_frame().unwrap().is_some());

        let file = dir.path().join("a.png");
        let mut single = open_source(file.to_str().unwrap()).unwrap();
        assert!(single.next_frame().unwrap().is_some());
        assert!(single.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_open_source_missing_path() {
        assert!(matches!(
            open_source("/nonexistent/facewatch/video.mp4"),
            Err(SourceError::OpenFailure { .. })
        ));
    }

    #[test]
    fn test_open_source_missing_camera_index() {
        assert!(matches!(
            open_source("4093"),
            Err(SourceError::OpenFailure { .. })
        ));
    }
}
