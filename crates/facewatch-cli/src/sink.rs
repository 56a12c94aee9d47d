//! Result sinks for the recognition loop.

use ab_glyph::{FontVec, PxScale};
use chrono::{SecondsFormat, Utc};
use facewatch_core::{BoundingBox, MatchResult};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

/// Receives every identified sample.
pub trait DisplaySink {
    fn show(
        &mut self,
        frame: &RgbImage,
        face: &BoundingBox,
        result: &MatchResult,
        caption: &str,
    ) -> Result<(), SinkError>;

    /// Called once when the loop ends, on every exit path.
    fn finish(&mut self) {}
}

impl<D: DisplaySink + ?Sized> DisplaySink for Box<D> {
    fn show(
        &mut self,
        frame: &RgbImage,
        face: &BoundingBox,
        result: &MatchResult,
        caption: &str,
    ) -> Result<(), SinkError> {
        (**self).show(frame, face, result, caption)
    }

    fn finish(&mut self) {
        (**self).finish()
    }
}

/// Writes one `tracing` event per result.
#[derive(Debug, Default)]
pub struct LogSink {
    shown: u64,
}

impl DisplaySink for LogSink {
    fn show(
        &mut self,
        _frame: &RgbImage,
        face: &BoundingBox,
        result: &MatchResult,
        caption: &str,
    ) -> Result<(), SinkError> {
        self.shown += 1;
        tracing::info!(
            caption,
            nearest = %result.nearest,
            left = face.left,
            top = face.top,
            right = face.right,
            bottom = face.bottom,
            "face identified"
        );
        Ok(())
    }

    fn finish(&mut self) {
        tracing::debug!(shown = self.shown, "log sink closed");
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    sample: u64,
    at: String,
    label: &'a str,
    score: f32,
    nearest: &'a str,
    #[serde(rename = "box")]
    bbox: [f32; 4],
}

/// One JSON object per line.
pub struct JsonLinesSink<W: Write> {
    out: W,
    sample: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, sample: 0 }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> DisplaySink for JsonLinesSink<W> {
    fn show(
        &mut self,
        _frame: &RgbImage,
        face: &BoundingBox,
        result: &MatchResult,
        _caption: &str,
    ) -> Result<(), SinkError> {
        self.sample += 1;
        let record = JsonRecord {
            sample: self.sample,
            at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            label: &result.label,
            score: result.score,
            nearest: &result.nearest,
            bbox: [face.left, face.top, face.right, face.bottom],
        };
        serde_json::to_writer(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) {
        if let Err(e) = self.out.flush() {
            tracing::warn!(error = %e, "failed to flush json output");
        }
    }
}

const OUTLINE: Rgb<u8> = Rgb([0, 255, 0]);
const CAPTION_SCALE: f32 = 18.0;

/// Fonts tried when no caption font is configured.
const FALLBACK_FONTS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

/// Load the font used for snapshot captions: `explicit` if given, else the
/// first system fallback that parses.
pub fn load_caption_font(explicit: Option<&Path>) -> Option<FontVec> {
    let candidates: Vec<PathBuf> = match explicit {
        Some(path) => vec![path.to_path_buf()],
        None => FALLBACK_FONTS.iter().map(PathBuf::from).collect(),
    };
    for path in candidates {
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        match FontVec::try_from_vec(bytes) {
            Ok(font) => {
                tracing::debug!(path = %path.display(), "caption font loaded");
                return Some(font);
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "unusable caption font"),
        }
    }
    tracing::warn!("no caption font available; snapshots carry the box outline only");
    None
}

/// Saves each sampled frame as `sample_<n>.png` with the face box outlined
/// and, when a font is available, the caption written above it.
pub struct SnapshotSink {
    dir: PathBuf,
    sample: u64,
    font: Option<FontVec>,
}

impl SnapshotSink {
    pub fn new(dir: PathBuf, font: Option<FontVec>) -> Result<Self, SinkError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            sample: 0,
            font,
        })
    }
}

impl DisplaySink for SnapshotSink {
    fn show(
        &mut self,
        frame: &RgbImage,
        face: &BoundingBox,
        _result: &MatchResult,
        caption: &str,
    ) -> Result<(), SinkError> {
        self.sample += 1;
        let mut canvas = frame.clone();
        draw_outline(&mut canvas, face, OUTLINE);
        if let Some(font) = &self.font {
            draw_caption(&mut canvas, face, caption, font, OUTLINE);
        }

        let path = self.dir.join(format!("sample_{}.png", self.sample));
        canvas.save(&path)?;
        tracing::debug!(path = %path.display(), caption, "snapshot written");
        Ok(())
    }
}

/// 1-pixel rectangle along the box edges; parts outside the image are clipped.
pub fn draw_outline(img: &mut RgbImage, face: &BoundingBox, color: Rgb<u8>) {
    let rect = Rect::at(face.left as i32, face.top as i32)
        .of_size(face.width().max(1.0) as u32, face.height().max(1.0) as u32);
    draw_hollow_rect_mut(img, rect, color);
}

/// Caption just above the box, or inside its top edge when the box touches
/// the top of the frame.
pub fn draw_caption(
    img: &mut RgbImage,
    face: &BoundingBox,
    caption: &str,
    font: &FontVec,
    color: Rgb<u8>,
) {
    let scale = PxScale::from(CAPTION_SCALE);
    let (_, text_h) = text_size(scale, font, caption);
    let x = face.left.max(0.0) as i32;
    let y = (face.top as i32 - text_h as i32 - 2).max(0);
    draw_text_mut(img, color, x, y, scale, font, caption);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(label: &str, score: f32) -> MatchResult {
        MatchResult {
            label: label.to_string(),
            score,
            nearest: "alice_0".to_string(),
        }
    }

    #[test]
    fn test_json_lines_records() {
        let frame = RgbImage::new(4, 4);
        let face = BoundingBox::new(1.0, 2.0, 3.0, 4.0, 0.9);
        let mut sink = JsonLinesSink::new(Vec::new());

        sink.show(&frame, &face, &result("alice_0", 0.8), "alice_0 0.8000")
            .unwrap();
        sink.show(&frame, &face, &result("unknown", 0.2), "unknown 0.2000")
            .unwrap();
        sink.finish();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["sample"], 1);
        assert_eq!(lines[0]["label"], "alice_0");
        assert_eq!(lines[0]["box"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(lines[1]["label"], "unknown");
        assert_eq!(lines[1]["nearest"], "alice_0");
        assert!(lines[1]["at"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_snapshot_sink_writes_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SnapshotSink::new(dir.path().join("shots"), None).unwrap();
        let frame = RgbImage::new(20, 20);
        let face = BoundingBox::new(5.0, 5.0, 15.0, 15.0, 0.9);

        sink.show(&frame, &face, &result("a", 0.5), "a 0.5000").unwrap();
        sink.show(&frame, &face, &result("a", 0.5), "a 0.5000").unwrap();

        let second = image::open(dir.path().join("shots/sample_2.png"))
            .unwrap()
            .to_rgb8();
        assert_eq!(*second.get_pixel(5, 5), OUTLINE);
        assert_eq!(*second.get_pixel(10, 10), Rgb([0, 0, 0]));
        assert!(dir.path().join("shots/sample_1.png").exists());
    }

    #[test]
    fn test_draw_outline_clips_to_image() {
        let mut img = RgbImage::new(10, 10);
        let face = BoundingBox::new(-5.0, 2.0, 30.0, 40.0, 0.9);
        draw_outline(&mut img, &face, OUTLINE);
        // Only the top edge (y = 2) falls inside the image.
        assert_eq!(*img.get_pixel(0, 2), OUTLINE);
        assert_eq!(*img.get_pixel(9, 2), OUTLINE);
        assert_eq!(*img.get_pixel(5, 5), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(0, 9), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_load_caption_font_rejects_non_font() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.ttf");
        std::fs::write(&path, b"definitely not a font").unwrap();
        assert!(load_caption_font(Some(&path)).is_none());
        assert!(load_caption_font(Some(Path::new("/nonexistent/font.ttf"))).is_none());
    }

    #[test]
    fn test_snapshot_caption_written_above_box() {
        // Needs a system font; nothing to check on hosts without one.
        let Some(font) = load_caption_font(None) else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SnapshotSink::new(dir.path().to_path_buf(), Some(font)).unwrap();
        let frame = RgbImage::new(200, 120);
        let face = BoundingBox::new(20.0, 60.0, 120.0, 110.0, 0.9);

        sink.show(&frame, &face, &result("alice_0", 0.9), "alice_0 0.9000")
            .unwrap();

        let shot = image::open(dir.path().join("sample_1.png")).unwrap().to_rgb8();
        let lit_above_box = (0..60u32)
            .flat_map(|y| (0..200u32).map(move |x| (x, y)))
            .filter(|&(x, y)| shot.get_pixel(x, y).0[1] > 0)
            .count();
        assert!(lit_above_box > 0);
    }
}
