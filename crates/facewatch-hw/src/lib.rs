//! facewatch-hw: video sources for the recognition loop.
//!
//! Provides V4L2 camera capture, image-sequence playback and (with the
//! `ffmpeg` feature) video-file decoding behind the [`FrameSource`] trait.

pub mod camera;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use source::{open_source, FrameSource, ImageSequence, SourceError};
