//! Frame sampler: owns the camera for the length of one capture session and
//! runs the detector on one frame per `sample()` call.

use facegate_core::{Detection, Detector, DetectorError};
use facegate_hw::{draw_outline, CameraError, CameraOpener, FaceOutline, Frame, FrameSource};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error(transparent)]
    Device(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("sampler is not started")]
    NotStarted,
}

/// Result of one `sample()` call.
#[derive(Debug)]
pub enum Sample {
    Face { detection: Detection, sequence: u32 },
    NoFace { sequence: u32, dark: bool },
}

impl Sample {
    pub fn quality_score(&self) -> Option<f32> {
        match self {
            Sample::Face { detection, .. } => Some(detection.quality_score),
            Sample::NoFace { .. } => None,
        }
    }
}

pub struct FrameSampler<'a> {
    opener: &'a dyn CameraOpener,
    detector: &'a mut dyn Detector,
    source: Option<Box<dyn FrameSource>>,
    warmup_frames: usize,
    overlay: bool,
    last_preview: Option<Frame>,
}

impl<'a> FrameSampler<'a> {
    pub fn new(opener: &'a dyn CameraOpener, detector: &'a mut dyn Detector) -> Self {
        Self {
            opener,
            detector,
            source: None,
            warmup_frames: 0,
            overlay: false,
            last_preview: None,
        }
    }

    pub fn with_warmup(mut self, frames: usize) -> Self {
        self.warmup_frames = frames;
        self
    }

    /// Render outlines onto a copy of each face frame. Off when headless.
    pub fn with_overlay(mut self, enabled: bool) -> Self {
        self.overlay = enabled;
        self
    }

    /// Acquire the capture device. No-op when already started.
    pub fn start(&mut self) -> Result<(), SamplerError> {
        if self.source.is_some() {
            return Ok(());
        }
        let mut source = self.opener.open()?;
        tracing::info!(device = %source.describe(), "sampler started");

        for _ in 0..self.warmup_frames {
            if let Err(e) = source.grab() {
                tracing::debug!(error = %e, "warmup frame dropped");
            }
        }
        self.source = Some(source);
        Ok(())
    }

    /// Grab one frame and make a single detection attempt on it.
    pub fn sample(&mut self) -> Result<Sample, SamplerError> {
        let source = self.source.as_mut().ok_or(SamplerError::NotStarted)?;
        let frame = source.grab()?;

        if frame.is_dark() {
            tracing::debug!(seq = frame.sequence, "dark frame, detector skipped");
            return Ok(Sample::NoFace {
                sequence: frame.sequence,
                dark: true,
            });
        }

        let Some(detection) = self.detector.detect(&frame.data, frame.width, frame.height)? else {
            return Ok(Sample::NoFace {
                sequence: frame.sequence,
                dark: false,
            });
        };

        if self.overlay {
            let mut preview = frame.clone();
            draw_outline(
                &mut preview,
                &FaceOutline {
                    x: detection.face.x,
                    y: detection.face.y,
                    width: detection.face.width,
                    height: detection.face.height,
                    landmarks: detection.face.landmarks,
                },
            );
            self.last_preview = Some(preview);
        }

        Ok(Sample::Face {
            detection,
            sequence: frame.sequence,
        })
    }

    /// Most recent overlay frame, if overlays are on and a face was seen.
    pub fn take_preview(&mut self) -> Option<Frame> {
        self.last_preview.take()
    }

    pub fn is_active(&self) -> bool {
        self.source.is_some()
    }

    /// Release the capture device. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(source) = self.source.take() {
            tracing::info!(device = %source.describe(), "sampler stopped");
            drop(source);
        }
    }
}

impl Drop for FrameSampler<'_> {
    fn drop(&mut self) {
        self.stop();
    }
}
