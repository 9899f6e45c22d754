//! facegate-core: descriptor aggregation, quality gating and gallery matching.
//!
//! The detector/embedder is an injected capability ([`Detector`]). With the
//! `onnx` feature, [`onnx::OnnxDetector`] provides SCRFD detection plus a
//! 128-d embedder via ONNX Runtime.

pub mod aggregator;
pub mod detector;
pub mod matcher;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod quality;
pub mod types;

pub use aggregator::{Aggregate, AggregateError, DescriptorAggregator};
pub use detector::{Detector, DetectorError};
pub use matcher::{Candidate, EuclideanMatcher, MatchError, MatchOutcome, Matcher};
pub use quality::{FrameVerdict, GateConfig, GateError, QualityGate};
pub use types::{BoundingBox, Descriptor, DescriptorError, Detection, GalleryEntry, DESCRIPTOR_DIM};

