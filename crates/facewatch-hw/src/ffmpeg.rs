//! Video-file decoding via ffmpeg-next (libavformat + libavcodec).

use crate::source::{FrameSource, SourceError};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Decodes a video file frame by frame, converting each frame to RGB24.
pub struct FfmpegSource {
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
    path: PathBuf,
    flushing: bool,
    done: bool,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let open_err = |reason: String| SourceError::OpenFailure {
            spec: path.display().to_string(),
            reason,
        };

        ffmpeg::init().map_err(|e| open_err(e.to_string()))?;
        let ictx = ffmpeg::format::input(path).map_err(|e| open_err(e.to_string()))?;

        let (stream_index, decoder) = {
            let stream = ictx
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| open_err("no video stream found".to_string()))?;
            let codec_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| open_err(e.to_string()))?;
            let decoder = codec_ctx.decoder().video().map_err(|e| open_err(e.to_string()))?;
            (stream.index(), decoder)
        };

        let (width, height) = (decoder.width(), decoder.height());
        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| open_err(e.to_string()))?;

        tracing::info!(path = %path.display(), width, height, "opened video file");

        Ok(Self {
            ictx,
            decoder,
            scaler,
            stream_index,
            width,
            height,
            path: path.to_path_buf(),
            flushing: false,
            done: false,
        })
    }

    /// Pull one decoded frame out of the decoder, if it has one ready.
    fn try_receive(&mut self) -> Result<Option<RgbImage>, SourceError> {
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        if !frame_ready(self.decoder.receive_frame(&mut decoded), &self.path)? {
            return Ok(None);
        }

        let mut rgb = ffmpeg::util::frame::video::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb)
            .map_err(|e| SourceError::ReadFailure(format!("{}: {e}", self.path.display())))?;

        let pixels = extract_rgb_pixels(&rgb, self.width, self.height);
        RgbImage::from_raw(self.width, self.height, pixels)
            .map(Some)
            .ok_or_else(|| SourceError::ReadFailure("decoded frame size mismatch".into()))
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        if self.done {
            return Ok(None);
        }
        if let Some(frame) = self.try_receive()? {
            return Ok(Some(frame));
        }
        if self.flushing {
            self.done = true;
            return Ok(None);
        }

        loop {
            let Some((stream, packet)) = self.ictx.packets().next() else {
                let _ = self.decoder.send_eof();
                self.flushing = true;
                let frame = self.try_receive()?;
                self.done = frame.is_none();
                return Ok(frame);
            };

            if stream.index() != self.stream_index {
                continue;
            }
            if let Err(e) = self.decoder.send_packet(&packet) {
                tracing::debug!(error = %e, "dropping undecodable packet");
                continue;
            }
            if let Some(frame) = self.try_receive()? {
                return Ok(Some(frame));
            }
        }
    }

    fn describe(&self) -> String {
        format!("{} ({}x{})", self.path.display(), self.width, self.height)
    }
}

/// Classify a `receive_frame` result. `EAGAIN` (needs more input) and `Eof`
/// (fully drained) mean no frame right now; any other error is a read failure.
fn frame_ready(received: Result<(), ffmpeg::Error>, path: &Path) -> Result<bool, SourceError> {
    match received {
        Ok(()) => Ok(true),
        Err(ffmpeg::Error::Eof) => Ok(false),
        Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(false),
        Err(e) => Err(SourceError::ReadFailure(format!("{}: {e}", path.display()))),
    }
}

/// Copy RGB rows out of a frame whose rows may be padded to `stride`.
fn extract_rgb_pixels(rgb: &ffmpeg::util::frame::video::Video, width: u32, height: u32) -> Vec<u8> {
    let stride = rgb.stride(0);
    let data = rgb.data(0);
    let row_len = width as usize * 3;

    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_len]);
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_ready_classifies_decoder_results() {
        let path = Path::new("clip.mp4");
        assert!(frame_ready(Ok(()), path).unwrap());
        assert!(!frame_ready(Err(ffmpeg::Error::Eof), path).unwrap());
        let again = ffmpeg::Error::Other {
            errno: ffmpeg::error::EAGAIN,
        };
        assert!(!frame_ready(Err(again), path).unwrap());
    }

    #[test]
    fn test_frame_ready_surfaces_decode_errors() {
        let result = frame_ready(Err(ffmpeg::Error::InvalidData), Path::new("clip.mp4"));
        match result {
            Err(SourceError::ReadFailure(msg)) => assert!(msg.starts_with("clip.mp4: ")),
            other => panic!("expected ReadFailure, got {other:?}"),
        }
    }
}
