//! The detector capability.
//!
//! Detection and embedding are an opaque, injected capability: the sampler,
//! gate, aggregator and matcher only ever see [`Detection`] values. Any model
//! can sit behind the trait; the `onnx` feature ships one.

use crate::types::{DescriptorError, Detection};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("detector produced an invalid descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),
    #[cfg(feature = "onnx")]
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// `detect(frame) -> descriptor | none` over a grayscale frame.
///
/// Returns `Ok(None)` when no face is present. Implementations make a single
/// best-effort attempt per call; pacing and retries belong to the caller.
pub trait Detector {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Detection>, DetectorError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Detection>, DetectorError> {
        (**self).detect(frame, width, height)
    }
}
