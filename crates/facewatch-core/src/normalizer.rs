//! Face selection and square crop normalization.
//!
//! Picks the most prominent detected face (largest vertical extent), grows
//! the box upward to include the forehead, squares it around the horizontal
//! center, and resamples the region to a 112×112 crop.
//!
//! Faces shorter than the minimum height are not cropped at all: the raw
//! input frame is handed back as the "crop". Downstream stages accept it,
//! but an embedding of a whole frame is rarely meaningful, so the path is
//! flagged via [`FaceCrop::is_degraded`] and logged.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

/// Side length of the normalized face crop.
pub const FACE_CROP_SIZE: u32 = 112;
/// Faces shorter than this (in pixels) are not cropped.
pub const DEFAULT_MIN_FACE_HEIGHT: u32 = 60;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face box lies outside the frame")]
    OutOfFrame,
}

/// Pixel region of the frame that is resampled into the crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// A normalized face image.
#[derive(Debug)]
pub enum FaceCrop<'a> {
    /// Square region resampled to `FACE_CROP_SIZE`.
    Aligned(RgbImage),
    /// Face too small to crop; the unmodified input frame.
    Uncropped(&'a RgbImage),
}

impl FaceCrop<'_> {
    pub fn image(&self) -> &RgbImage {
        match self {
            FaceCrop::Aligned(img) => img,
            FaceCrop::Uncropped(frame) => frame,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, FaceCrop::Uncropped(_))
    }
}

/// Normalizer output: the crop plus the selected (unadjusted) box for overlays.
#[derive(Debug)]
pub struct NormalizedFace<'a> {
    pub crop: FaceCrop<'a>,
    pub face: BoundingBox,
}

#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    pub min_face_height: u32,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            min_face_height: DEFAULT_MIN_FACE_HEIGHT,
        }
    }
}

impl Normalizer {
    pub fn new(min_face_height: u32) -> Self {
        Self { min_face_height }
    }

    /// Select the best face in `boxes` and produce its normalized crop.
    pub fn normalize<'a>(
        &self,
        frame: &'a RgbImage,
        boxes: &[BoundingBox],
    ) -> Result<NormalizedFace<'a>, NormalizeError> {
        let (_, face) = select_face(boxes).ok_or(NormalizeError::NoFaceDetected)?;

        let extent = pixel_extent(face);
        if extent < i64::from(self.min_face_height) {
            tracing::warn!(
                extent,
                min = self.min_face_height,
                "face too small; passing the whole frame through uncropped"
            );
            return Ok(NormalizedFace {
                crop: FaceCrop::Uncropped(frame),
                face: face.clone(),
            });
        }

        let region =
            crop_region(frame.width(), frame.height(), face).ok_or(NormalizeError::OutOfFrame)?;
        tracing::trace!(?region, "face crop region");

        let sub = imageops::crop_imm(frame, region.left, region.top, region.width, region.height)
            .to_image();
        let aligned = imageops::resize(&sub, FACE_CROP_SIZE, FACE_CROP_SIZE, FilterType::Triangle);

        Ok(NormalizedFace {
            crop: FaceCrop::Aligned(aligned),
            face: face.clone(),
        })
    }
}

/// Index and box with the largest vertical extent. Equal extents keep the
/// earlier box.
pub fn select_face(boxes: &[BoundingBox]) -> Option<(usize, &BoundingBox)> {
    let mut best: Option<(usize, &BoundingBox)> = None;
    for (i, candidate) in boxes.iter().enumerate() {
        match best {
            Some((_, b)) if pixel_extent(candidate) <= pixel_extent(b) => {}
            _ => best = Some((i, candidate)),
        }
    }
    best
}

/// Square crop region for `face` inside a `frame_w × frame_h` frame.
///
/// Works on truncated integer pixel coordinates. The top edge moves up by
/// 1/12 of the face height (clamped at 0), the side equals the new height,
/// and the square is centered on the box's horizontal midpoint, then
/// shifted to stay inside `[0, frame_w - side - 1]`. Rows and columns past
/// the frame edge are cut off, so the region always lies inside the frame.
/// Returns `None` when nothing of the region is inside the frame.
pub fn crop_region(frame_w: u32, frame_h: u32, face: &BoundingBox) -> Option<CropRegion> {
    let (fw, fh) = (i64::from(frame_w), i64::from(frame_h));
    let (x1, y1) = (face.left as i64, face.top as i64);
    let (x2, y2) = (face.right as i64, face.bottom as i64);

    let extent = y2 - y1;
    let top = ((y1 as f64 - extent as f64 / 12.0) as i64).max(0);
    let side = y2 - top;

    let middle = ((x1 + x2) as f64 / 2.0) as i64;
    let mut left = (middle as f64 - side as f64 / 2.0) as i64;
    if left < 0 {
        left = 0;
    } else if left + side >= fw {
        left = fw - side - 1;
    }
    let left = left.max(0);

    let bottom = y2.min(fh);
    let right = (left + side).min(fw);
    if side <= 0 || top >= bottom || left >= right {
        return None;
    }

    Some(CropRegion {
        left: left as u32,
        top: top as u32,
        width: (right - left) as u32,
        height: (bottom - top) as u32,
    })
}

fn pixel_extent(face: &BoundingBox) -> i64 {
    face.bottom as i64 - face.top as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(left: f32, top: f32, right: f32, bottom: f32) -> BoundingBox {
        BoundingBox::new(left, top, right, bottom, 0.99)
    }

    fn gradient_frame(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
    }

    #[test]
    fn test_select_largest_vertical_extent() {
        let boxes = vec![
            bbox(0.0, 0.0, 100.0, 40.0),
            bbox(200.0, 10.0, 260.0, 100.0),
            bbox(300.0, 30.0, 400.0, 100.0),
        ];
        let (idx, face) = select_face(&boxes).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(face.height(), 90.0);
    }

    #[test]
    fn test_select_ignores_width() {
        // Wide but short loses to narrow but tall.
        let boxes = vec![bbox(0.0, 0.0, 300.0, 80.0), bbox(0.0, 0.0, 20.0, 81.0)];
        assert_eq!(select_face(&boxes).unwrap().0, 1);
    }

    #[test]
    fn test_select_tie_keeps_first() {
        let boxes = vec![
            bbox(0.0, 0.0, 50.0, 80.0),
            bbox(100.0, 20.0, 150.0, 100.0),
        ];
        assert_eq!(select_face(&boxes).unwrap().0, 0);
    }

    #[test]
    fn test_select_empty() {
        assert!(select_face(&[]).is_none());
    }

    #[test]
    fn test_normalize_no_boxes() {
        let frame = gradient_frame(64, 64);
        let err = Normalizer::default().normalize(&frame, &[]).unwrap_err();
        assert_eq!(err, NormalizeError::NoFaceDetected);
    }

    #[test]
    fn test_crop_region_grows_forehead_and_squares() {
        // extent 120 → top moves up by 10, side 130, centered on x=200.
        let region = crop_region(640, 480, &bbox(150.0, 120.0, 250.0, 240.0)).unwrap();
        assert_eq!(
            region,
            CropRegion { left: 135, top: 110, width: 130, height: 130 }
        );
    }

    #[test]
    fn test_crop_region_clamps_top() {
        let region = crop_region(640, 480, &bbox(100.0, 5.0, 200.0, 125.0)).unwrap();
        assert_eq!(region.top, 0);
        assert_eq!(region.height, 125);
        assert_eq!(region.width, 125);
    }

    #[test]
    fn test_crop_region_clamps_left_edge() {
        let region = crop_region(640, 480, &bbox(0.0, 100.0, 40.0, 220.0)).unwrap();
        assert_eq!(region.left, 0);
    }

    #[test]
    fn test_crop_region_clamps_right_edge() {
        // Square of side 130 pushed against the right edge leaves one spare column.
        let region = crop_region(640, 480, &bbox(580.0, 120.0, 640.0, 240.0)).unwrap();
        assert_eq!(region.left, 640 - 130 - 1);
        assert_eq!(region.width, 130);
    }

    #[test]
    fn test_crop_region_outside_frame() {
        assert!(crop_region(640, 480, &bbox(100.0, 500.0, 200.0, 600.0)).is_none());
    }

    #[test]
    fn test_crop_region_always_inside_frame() {
        let (w, h) = (320u32, 240u32);
        for top in (-40..240).step_by(17) {
            for left in (-60..320).step_by(23) {
                for extent in [60, 61, 97, 150, 239, 300] {
                    let face = bbox(
                        left as f32,
                        top as f32,
                        (left + extent / 2) as f32,
                        (top + extent) as f32,
                    );
                    if let Some(r) = crop_region(w, h, &face) {
                        assert!(r.width > 0 && r.height > 0);
                        assert!(r.left + r.width <= w, "{r:?} exceeds width for {face:?}");
                        assert!(r.top + r.height <= h, "{r:?} exceeds height for {face:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_normalize_output_is_fixed_size() {
        let frame = gradient_frame(320, 240);
        let normalizer = Normalizer::default();
        for face in [
            bbox(100.0, 50.0, 160.0, 110.0),
            bbox(0.0, 0.0, 300.0, 239.0),
            bbox(290.0, 150.0, 320.0, 240.0),
            bbox(-20.0, -10.0, 80.0, 70.0),
        ] {
            let out = normalizer.normalize(&frame, &[face.clone()]).unwrap();
            assert!(!out.crop.is_degraded());
            assert_eq!(out.crop.image().dimensions(), (FACE_CROP_SIZE, FACE_CROP_SIZE));
            assert_eq!(out.face, face);
        }
    }

    #[test]
    fn test_normalize_small_face_returns_frame_unmodified() {
        let frame = gradient_frame(200, 150);
        let face = bbox(50.0, 40.0, 100.0, 99.0); // extent 59
        let out = Normalizer::default().normalize(&frame, &[face.clone()]).unwrap();

        assert!(out.crop.is_degraded());
        assert!(std::ptr::eq(out.crop.image(), &frame));
        assert_eq!(out.crop.image().dimensions(), (200, 150));
        assert_eq!(out.face, face);
    }

    #[test]
    fn test_normalize_minimum_height_is_cropped() {
        let frame = gradient_frame(200, 150);
        let out = Normalizer::default()
            .normalize(&frame, &[bbox(50.0, 40.0, 100.0, 100.0)])
            .unwrap();
        assert!(!out.crop.is_degraded());
    }

    #[test]
    fn test_normalize_uses_selected_box() {
        let frame = gradient_frame(320, 240);
        let boxes = vec![
            bbox(10.0, 10.0, 40.0, 50.0),
            bbox(150.0, 60.0, 230.0, 180.0),
            bbox(60.0, 10.0, 100.0, 80.0),
        ];
        let out = Normalizer::default().normalize(&frame, &boxes).unwrap();
        assert_eq!(out.face, boxes[1]);
    }

    #[test]
    fn test_normalize_box_outside_frame() {
        let frame = gradient_frame(100, 100);
        let err = Normalizer::default()
            .normalize(&frame, &[bbox(10.0, 150.0, 60.0, 230.0)])
            .unwrap_err();
        assert_eq!(err, NormalizeError::OutOfFrame);
    }
}
