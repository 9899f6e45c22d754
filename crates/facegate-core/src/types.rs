use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of components in every face descriptor.
pub const DESCRIPTOR_DIM: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("descriptor must have {expected} components, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("descriptor component {index} is not finite")]
    NonFinite { index: usize },
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// A 128-dimensional face descriptor.
///
/// Construction validates the length and rejects NaN/infinite components, so
/// every `Descriptor` in the system is safe to persist and compare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Result<Self, DescriptorError> {
        if values.len() != DESCRIPTOR_DIM {
            return Err(DescriptorError::InvalidLength {
                expected: DESCRIPTOR_DIM,
                actual: values.len(),
            });
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(DescriptorError::NonFinite { index });
        }
        Ok(Self { values })
    }

    pub(crate) fn from_validated(values: Vec<f32>) -> Self {
        debug_assert!(values.len() == DESCRIPTOR_DIM && values.iter().all(|v| v.is_finite()));
        Self { values }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }

    /// Euclidean distance: `sqrt(Σ (a[i] - b[i])²)`.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl TryFrom<Vec<f32>> for Descriptor {
    type Error = DescriptorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Descriptor> for Vec<f32> {
    fn from(d: Descriptor) -> Self {
        d.values
    }
}

/// One detector result: the face's descriptor plus the detector's confidence.
#[derive(Debug, Clone)]
pub struct Detection {
    pub descriptor: Descriptor,
    /// Per-sample confidence in [0, 1].
    pub quality_score: f32,
    pub face: BoundingBox,
}

/// An enrolled descriptor as seen by the matcher.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub descriptor_id: String,
    pub identity_id: String,
    pub descriptor: Descriptor,
}
