//! The recognition loop: sample frames from a source, identify the face in
//! each sample, forward results to a sink.

use crate::sink::DisplaySink;
use facewatch_core::{
    localize, BoundingBox, EmbeddingExtractor, FaceLocalizer, Gallery, Localization, MatchError,
    MatchResult, Matcher, Normalizer,
};
use facewatch_hw::{FrameSource, SourceError};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("video source: {0}")]
    Source(#[from] SourceError),
    #[error("matching failed: {0}")]
    Match(#[from] MatchError),
    #[error("gallery is empty; enroll at least one identity first")]
    EmptyGallery,
    #[error("sample interval must be at least 1")]
    InvalidSampleRate,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndReason {
    #[default]
    Exhausted,
    Interrupted,
}

/// Counters for one run of the recognition loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_read: u64,
    pub samples: u64,
    pub matched: u64,
    pub unknown: u64,
    pub skipped: u64,
    pub end: EndReason,
}

/// Result of processing one sampled frame.
enum Sample {
    Identified(BoundingBox, MatchResult),
    Skipped(String),
}

/// Drives localize → normalize → extract → match over a frame source,
/// one sampled frame at a time, on the calling thread.
pub struct StreamController<L, E, M> {
    localizer: L,
    extractor: E,
    normalizer: Normalizer,
    matcher: M,
    gallery: Arc<Gallery>,
    sample_every: u64,
}

impl<L: FaceLocalizer, E: EmbeddingExtractor, M: Matcher> StreamController<L, E, M> {
    pub fn new(
        localizer: L,
        extractor: E,
        normalizer: Normalizer,
        matcher: M,
        gallery: Arc<Gallery>,
        sample_every: u64,
    ) -> Result<Self, ControllerError> {
        if sample_every == 0 {
            return Err(ControllerError::InvalidSampleRate);
        }
        if gallery.is_empty() {
            return Err(ControllerError::EmptyGallery);
        }
        Ok(Self {
            localizer,
            extractor,
            normalizer,
            matcher,
            gallery,
            sample_every,
        })
    }

    /// Run until the source is exhausted, `stop` is raised, or a fatal
    /// error occurs. The source is consumed and dropped before returning;
    /// `sink.finish()` runs on every exit path.
    pub fn run<S, D>(
        &mut self,
        mut source: S,
        sink: &mut D,
        stop: &AtomicBool,
    ) -> Result<RunSummary, ControllerError>
    where
        S: FrameSource,
        D: DisplaySink + ?Sized,
    {
        tracing::info!(
            source = %source.describe(),
            sample_every = self.sample_every,
            identities = self.gallery.len(),
            "recognition loop started"
        );

        let mut summary = RunSummary::default();
        let outcome = self.drive(&mut source, sink, stop, &mut summary);
        sink.finish();
        drop(source);

        match outcome {
            Ok(end) => {
                summary.end = end;
                tracing::info!(?summary, "recognition loop finished");
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(error = %e, frames_read = summary.frames_read, "recognition loop aborted");
                Err(e)
            }
        }
    }

    fn drive<S, D>(
        &mut self,
        source: &mut S,
        sink: &mut D,
        stop: &AtomicBool,
        summary: &mut RunSummary,
    ) -> Result<EndReason, ControllerError>
    where
        S: FrameSource,
        D: DisplaySink + ?Sized,
    {
        loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(EndReason::Interrupted);
            }
            let Some(frame) = source.next_frame()? else {
                return Ok(EndReason::Exhausted);
            };
            summary.frames_read += 1;
            if summary.frames_read % self.sample_every != 0 {
                continue;
            }
            summary.samples += 1;

            match self.process(&frame)? {
                Sample::Skipped(reason) => {
                    summary.skipped += 1;
                    tracing::debug!(frame = summary.frames_read, %reason, "sample skipped");
                }
                Sample::Identified(face, result) => {
                    if result.is_unknown() {
                        summary.unknown += 1;
                    } else {
                        summary.matched += 1;
                    }
                    let caption = result.to_string();
                    if let Err(e) = sink.show(&frame, &face, &result, &caption) {
                        tracing::warn!(error = %e, "display sink failed");
                    }
                }
            }
        }
    }

    fn process(&mut self, frame: &RgbImage) -> Result<Sample, MatchError> {
        let boxes = match localize(&mut self.localizer, frame) {
            Localization::Found(boxes) => boxes,
            Localization::Missed(reason) => return Ok(Sample::Skipped(reason.to_string())),
        };
        let normalized = match self.normalizer.normalize(frame, &boxes) {
            Ok(n) => n,
            Err(e) => return Ok(Sample::Skipped(e.to_string())),
        };
        let embedding = match self.extractor.extract(normalized.crop.image()) {
            Ok(e) => e,
            Err(e) => return Ok(Sample::Skipped(e.to_string())),
        };
        let result = self.matcher.identify(&embedding, &self.gallery)?;
        Ok(Sample::Identified(normalized.face, result))
    }
}
