//! ONNX Runtime backend for the [`Detector`] capability: SCRFD localisation
//! followed by a 128-d embedding of the most confident face.

mod alignment;
mod embedder;
mod scrfd;

use crate::detector::{Detector, DetectorError};
use crate::types::Detection;
use embedder::FaceEmbedder;
use scrfd::FaceLocator;
use std::path::Path;

/// File name of the SCRFD detection model inside the model directory.
pub const LOCATOR_MODEL: &str = "det_10g.onnx";
/// File name of the 128-d embedding model inside the model directory.
pub const EMBEDDER_MODEL: &str = "face_embed_128.onnx";

pub struct OnnxDetector {
    locator: FaceLocator,
    embedder: FaceEmbedder,
}

impl OnnxDetector {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, DetectorError> {
        let locator = FaceLocator::load(&model_dir.join(LOCATOR_MODEL).to_string_lossy())?;
        let embedder = FaceEmbedder::load(&model_dir.join(EMBEDDER_MODEL).to_string_lossy())?;
        Ok(Self { locator, embedder })
    }
}

impl Detector for OnnxDetector {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Detection>, DetectorError> {
        let faces = self.locator.locate(frame, width, height)?;
        let Some(face) = faces.into_iter().next() else {
            return Ok(None);
        };

        let descriptor = self.embedder.embed(frame, width, height, &face)?;
        Ok(Some(Detection {
            descriptor,
            quality_score: face.confidence.clamp(0.0, 1.0),
            face,
        }))
    }
}
