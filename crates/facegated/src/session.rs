//! Capture sessions: drive the sampler through the quality gate until an
//! enrollment aggregate or a single probe descriptor is ready.

use crate::sampler::{FrameSampler, Sample, SamplerError};
use facegate_core::{
    Aggregate, AggregateError, DescriptorAggregator, Detection, DetectorError, FrameVerdict, GateConfig,
    GateError, QualityGate,
};
use facegate_hw::{CameraError, Frame};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("face lost after {consecutive_misses} consecutive misses")]
    FaceLost { consecutive_misses: u32 },
    #[error("insufficient samples: collected {collected} of {required}")]
    InsufficientSamples { collected: usize, required: usize },
    #[error("aggregate quality {score:.3} is below the threshold {threshold:.3}")]
    QualityTooLow { score: f32, threshold: f32 },
    #[error("session cancelled after {collected} accepted samples")]
    Cancelled { collected: usize },
    #[error(transparent)]
    Device(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("sampler is not started")]
    NotStarted,
    #[error("aggregation failed: {0}")]
    Aggregate(AggregateError),
    #[error(transparent)]
    Gate(GateError),
}

impl From<SamplerError> for SessionError {
    fn from(e: SamplerError) -> Self {
        match e {
            SamplerError::Device(e) => SessionError::Device(e),
            SamplerError::Detector(e) => SessionError::Detector(e),
            SamplerError::NotStarted => SessionError::NotStarted,
        }
    }
}

impl From<AggregateError> for SessionError {
    fn from(e: AggregateError) -> Self {
        match e {
            AggregateError::InsufficientSamples { collected, required } => {
                SessionError::InsufficientSamples { collected, required }
            }
            other => SessionError::Aggregate(other),
        }
    }
}

impl From<GateError> for SessionError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::QualityTooLow { score, threshold } => SessionError::QualityTooLow { score, threshold },
            other => SessionError::Gate(other),
        }
    }
}

/// Per-session policy.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub gate: GateConfig,
    pub abort_on_face_lost: bool,
    pub timeout: Duration,
}

/// A finished enrollment capture: the aggregate plus the last overlay frame.
#[derive(Debug)]
pub struct EnrollmentCapture {
    pub aggregate: Aggregate,
    pub preview: Option<Frame>,
}

/// Collect K accepted samples and reduce them to one descriptor.
///
/// The sampler is stopped on every return path. `is_cancelled` is polled
/// once per frame.
pub fn run_enrollment(
    sampler: &mut FrameSampler<'_>,
    config: &SessionConfig,
    is_cancelled: &dyn Fn() -> bool,
) -> Result<EnrollmentCapture, SessionError> {
    let result = collect_enrollment(sampler, config, is_cancelled);
    sampler.stop();
    result
}

fn collect_enrollment(
    sampler: &mut FrameSampler<'_>,
    config: &SessionConfig,
    is_cancelled: &dyn Fn() -> bool,
) -> Result<EnrollmentCapture, SessionError> {
    let mut gate = QualityGate::new(config.gate.clone());
    let mut aggregator = DescriptorAggregator::new(config.gate.required_samples);
    let deadline = Instant::now() + config.timeout;

    sampler.start()?;

    while !gate.can_finalize(aggregator.collected()) {
        if is_cancelled() {
            tracing::info!(collected = aggregator.collected(), "enrollment cancelled");
            return Err(SessionError::Cancelled {
                collected: aggregator.collected(),
            });
        }
        if Instant::now() >= deadline {
            tracing::warn!(
                collected = aggregator.collected(),
                required = aggregator.required(),
                "enrollment timed out"
            );
            return Err(SessionError::InsufficientSamples {
                collected: aggregator.collected(),
                required: aggregator.required(),
            });
        }

        let sample = sampler.sample()?;
        match gate.judge(sample.quality_score()) {
            FrameVerdict::Accepted => {
                let Sample::Face { detection, sequence } = sample else {
                    continue;
                };
                let collected = aggregator.push(detection.descriptor, detection.quality_score)?;
                tracing::debug!(
                    seq = sequence,
                    quality = detection.quality_score,
                    collected,
                    required = aggregator.required(),
                    "sample accepted"
                );
            }
            FrameVerdict::Rejected { consecutive_misses } => {
                tracing::trace!(consecutive_misses, "sample rejected");
            }
            FrameVerdict::FaceLost { consecutive_misses } => {
                if config.abort_on_face_lost {
                    tracing::info!(
                        consecutive_misses,
                        collected = aggregator.collected(),
                        "face lost, aborting enrollment"
                    );
                    return Err(SessionError::FaceLost { consecutive_misses });
                }
                tracing::debug!(consecutive_misses, "face lost, waiting");
                gate.reset_misses();
            }
        }
    }

    let aggregate = aggregator.finalize()?;
    gate.check_aggregate(aggregate.quality_score)?;

    tracing::info!(
        samples = aggregate.sample_count,
        quality = aggregate.quality_score,
        "enrollment aggregate ready"
    );

    Ok(EnrollmentCapture {
        aggregate,
        preview: sampler.take_preview(),
    })
}

/// Sample until one frame passes the per-frame gate and return its detection.
pub fn run_probe(
    sampler: &mut FrameSampler<'_>,
    config: &SessionConfig,
    is_cancelled: &dyn Fn() -> bool,
) -> Result<Detection, SessionError> {
    let result = collect_probe(sampler, config, is_cancelled);
    sampler.stop();
    result
}

fn collect_probe(
    sampler: &mut FrameSampler<'_>,
    config: &SessionConfig,
    is_cancelled: &dyn Fn() -> bool,
) -> Result<Detection, SessionError> {
    let mut gate = QualityGate::new(config.gate.clone());
    let deadline = Instant::now() + config.timeout;

    sampler.start()?;

    loop {
        if is_cancelled() {
            return Err(SessionError::Cancelled { collected: 0 });
        }
        if Instant::now() >= deadline {
            return Err(SessionError::InsufficientSamples {
                collected: 0,
                required: 1,
            });
        }

        let sample = sampler.sample()?;
        match (gate.judge(sample.quality_score()), sample) {
            (FrameVerdict::Accepted, Sample::Face { detection, sequence }) => {
                tracing::debug!(seq = sequence, quality = detection.quality_score, "probe captured");
                return Ok(detection);
            }
            (FrameVerdict::FaceLost { consecutive_misses }, _) if config.abort_on_face_lost => {
                return Err(SessionError::FaceLost { consecutive_misses });
            }
            (FrameVerdict::FaceLost { .. }, _) => gate.reset_misses(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::testing::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn config(required: usize) -> SessionConfig {
        SessionConfig {
            gate: GateConfig {
                required_samples: required,
                ..GateConfig::default()
            },
            abort_on_face_lost: false,
            timeout: Duration::from_secs(5),
        }
    }

    fn never() -> bool {
        false
    }

    #[test]
    fn test_enrollment_collects_k_samples() {
        let (camera, probe) = FakeCamera::new();
        let mut detector = ScriptedDetector::new(ScriptedDetector::faces(10, 0.8), Step::NoFace);
        let mut sampler = FrameSampler::new(&camera, &mut detector);

        let capture = run_enrollment(&mut sampler, &config(10), &never).unwrap();
        assert_eq!(capture.aggregate.sample_count, 10);
        assert!((capture.aggregate.quality_score - 0.8).abs() < 1e-6);
        // Mean of 0.00..0.09
        assert!((capture.aggregate.descriptor.as_slice()[0] - 0.045).abs() < 1e-5);
        assert!(capture.preview.is_none());
        assert!(!probe.held.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_after_three_of_ten_releases_device() {
        let (camera, probe) = FakeCamera::new();
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut detector = ScriptedDetector::new([], Step::Face { value: 0.1, quality: 0.9 });
        let flag = cancelled.clone();
        detector.on_call = Some(Box::new(move |calls| {
            if calls == 3 {
                flag.store(true, Ordering::SeqCst);
            }
        }));
        let mut sampler = FrameSampler::new(&camera, &mut detector);

        let is_cancelled = || cancelled.load(Ordering::SeqCst);
        let err = run_enrollment(&mut sampler, &config(10), &is_cancelled).unwrap_err();
        assert!(matches!(err, SessionError::Cancelled { collected: 3 }));
        assert!(!probe.held.load(Ordering::SeqCst));
        assert!(!sampler.is_active());
    }

    #[test]
    fn test_face_lost_aborts_when_configured() {
        let (camera, probe) = FakeCamera::new();
        let mut steps = ScriptedDetector::faces(2, 0.9);
        steps.push(Step::NoFace);
        let mut detector = ScriptedDetector::new(steps, Step::Face { value: 0.1, quality: 0.9 });
        let mut sampler = FrameSampler::new(&camera, &mut detector);

        let mut cfg = config(10);
        cfg.abort_on_face_lost = true;
        let err = run_enrollment(&mut sampler, &cfg, &never).unwrap_err();
        assert!(matches!(err, SessionError::FaceLost { consecutive_misses: 1 }));
        assert!(!probe.held.load(Ordering::SeqCst));
    }

    #[test]
    fn test_face_lost_waits_by_default() {
        let (camera, _) = FakeCamera::new();
        let steps = [
            Step::Face { value: 0.1, quality: 0.9 },
            Step::NoFace,
            Step::Face { value: 0.1, quality: 0.2 },
            Step::Face { value: 0.1, quality: 0.9 },
        ];
        let mut detector = ScriptedDetector::new(steps, Step::NoFace);
        let mut sampler = FrameSampler::new(&camera, &mut detector);

        let capture = run_enrollment(&mut sampler, &config(2), &never).unwrap();
        assert_eq!(capture.aggregate.sample_count, 2);
    }

    #[test]
    fn test_deadline_yields_insufficient_samples() {
        let (camera, probe) = FakeCamera::new();
        let mut detector = ScriptedDetector::new(ScriptedDetector::faces(3, 0.9), Step::NoFace);
        let mut sampler = FrameSampler::new(&camera, &mut detector);

        let mut cfg = config(10);
        cfg.timeout = Duration::from_millis(50);
        let err = run_enrollment(&mut sampler, &cfg, &never).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InsufficientSamples {
                collected: 3,
                required: 10
            }
        ));
        assert!(!probe.held.load(Ordering::SeqCst));
    }

    #[test]
    fn test_low_aggregate_quality_rejected() {
        let (camera, _) = FakeCamera::new();
        let mut detector = ScriptedDetector::new(ScriptedDetector::faces(4, 0.6), Step::NoFace);
        let mut sampler = FrameSampler::new(&camera, &mut detector);

        let mut cfg = config(4);
        cfg.gate.enroll_threshold = 0.7;
        let err = run_enrollment(&mut sampler, &cfg, &never).unwrap_err();
        assert!(matches!(err, SessionError::QualityTooLow { .. }));
    }

    #[test]
    fn test_detector_failure_releases_device() {
        let (camera, probe) = FakeCamera::new();
        let mut detector = ScriptedDetector::new([Step::Fail], Step::NoFace);
        let mut sampler = FrameSampler::new(&camera, &mut detector);

        let err = run_enrollment(&mut sampler, &config(10), &never).unwrap_err();
        assert!(matches!(err, SessionError::Detector(_)));
        assert!(!probe.held.load(Ordering::SeqCst));
    }

    #[test]
    fn test_device_unavailable() {
        let (mut camera, _) = FakeCamera::new();
        camera.fail_open = true;
        let mut detector = ScriptedDetector::new([], Step::NoFace);
        let mut sampler = FrameSampler::new(&camera, &mut detector);

        let err = run_enrollment(&mut sampler, &config(10), &never).unwrap_err();
        assert!(matches!(err, SessionError::Device(CameraError::DeviceUnavailable(_))));
    }

    #[test]
    fn test_probe_returns_first_accepted_frame() {
        let (camera, probe) = FakeCamera::new();
        let steps = [
            Step::NoFace,
            Step::Face { value: 0.3, quality: 0.1 },
            Step::Face { value: 0.5, quality: 0.9 },
        ];
        let mut detector = ScriptedDetector::new(steps, Step::NoFace);
        let mut sampler = FrameSampler::new(&camera, &mut detector);

        let detection = run_probe(&mut sampler, &config(10), &never).unwrap();
        assert_eq!(detection.descriptor.as_slice()[0], 0.5);
        assert!(!probe.held.load(Ordering::SeqCst));
    }

    #[test]
    fn test_probe_cancelled() {
        let (camera, _) = FakeCamera::new();
        let mut detector = ScriptedDetector::new([], Step::NoFace);
        let mut sampler = FrameSampler::new(&camera, &mut detector);

        let err = run_probe(&mut sampler, &config(10), &|| true).unwrap_err();
        assert!(matches!(err, SessionError::Cancelled { collected: 0 }));
    }
}
