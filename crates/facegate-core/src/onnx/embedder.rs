//! 128-d face embedder over aligned 112×112 crops.

use super::alignment::{self, ALIGNED_SIZE};
use crate::detector::DetectorError;
use crate::types::{BoundingBox, Descriptor, DESCRIPTOR_DIM};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;

pub(crate) struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    pub(crate) fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session })
    }

    /// Align the face, run the model, and L2-normalise the 128-d output.
    pub(crate) fn embed(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Descriptor, DetectorError> {
        let landmarks = face
            .landmarks
            .as_ref()
            .ok_or_else(|| DetectorError::InferenceFailed("face has no landmarks to align".into()))?;

        let aligned = alignment::align_face(frame, width, height, landmarks);
        let input = to_tensor(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("embedding output: {e}")))?;

        if raw.len() != DESCRIPTOR_DIM {
            return Err(DetectorError::InferenceFailed(format!(
                "embedding model returned {} values, expected {DESCRIPTOR_DIM}",
                raw.len()
            )));
        }

        Ok(Descriptor::new(l2_normalize(raw))?)
    }
}

fn to_tensor(aligned: &[u8]) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, ALIGNED_SIZE, ALIGNED_SIZE));
    for y in 0..ALIGNED_SIZE {
        for x in 0..ALIGNED_SIZE {
            let pixel = aligned.get(y * ALIGNED_SIZE + x).copied().unwrap_or(0) as f32;
            let v = (pixel - PIXEL_MEAN) / PIXEL_STD;
            for c in 0..3 {
                tensor[[0, c, y, x]] = v;
            }
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}
