//! Quality gate: per-frame acceptance and the finalize rule for aggregates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default per-frame acceptance threshold.
pub const DEFAULT_FRAME_THRESHOLD: f32 = 0.5;
/// Default threshold an aggregate must meet to be persisted.
pub const DEFAULT_ENROLL_THRESHOLD: f32 = 0.5;
/// Default number of accepted frames per enrollment.
pub const DEFAULT_REQUIRED_SAMPLES: usize = 10;
/// Default consecutive misses before the face counts as lost (any miss).
pub const DEFAULT_MAX_CONSECUTIVE_MISSES: u32 = 1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateError {
    #[error("quality score {score:.3} is below the threshold {threshold:.3}")]
    QualityTooLow { score: f32, threshold: f32 },
    #[error("invalid gate configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub frame_threshold: f32,
    pub enroll_threshold: f32,
    /// K: accepted frames needed before an enrollment may finalize.
    pub required_samples: usize,
    pub max_consecutive_misses: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            frame_threshold: DEFAULT_FRAME_THRESHOLD,
            enroll_threshold: DEFAULT_ENROLL_THRESHOLD,
            required_samples: DEFAULT_REQUIRED_SAMPLES,
            max_consecutive_misses: DEFAULT_MAX_CONSECUTIVE_MISSES,
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<(), GateError> {
        for (name, v) in [
            ("frame_threshold", self.frame_threshold),
            ("enroll_threshold", self.enroll_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(GateError::InvalidConfig(format!("{name} must be in [0, 1], got {v}")));
            }
        }
        if self.required_samples == 0 {
            return Err(GateError::InvalidConfig("required_samples must be at least 1".into()));
        }
        if self.max_consecutive_misses == 0 {
            return Err(GateError::InvalidConfig("max_consecutive_misses must be at least 1".into()));
        }
        Ok(())
    }
}

/// Outcome of judging one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameVerdict {
    Accepted,
    /// Discarded; still under the consecutive-miss limit.
    Rejected { consecutive_misses: u32 },
    /// The miss limit was reached. The caller decides whether to abort or wait.
    FaceLost { consecutive_misses: u32 },
}

/// Per-session gate state.
#[derive(Debug, Clone)]
pub struct QualityGate {
    config: GateConfig,
    consecutive_misses: u32,
}

impl QualityGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            consecutive_misses: 0,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Judge one sample. `None` means the detector found no face.
    pub fn judge(&mut self, quality_score: Option<f32>) -> FrameVerdict {
        match quality_score {
            Some(q) if q.is_finite() && q >= self.config.frame_threshold => {
                self.consecutive_misses = 0;
                FrameVerdict::Accepted
            }
            _ => {
                self.consecutive_misses = self.consecutive_misses.saturating_add(1);
                if self.consecutive_misses >= self.config.max_consecutive_misses {
                    FrameVerdict::FaceLost {
                        consecutive_misses: self.consecutive_misses,
                    }
                } else {
                    FrameVerdict::Rejected {
                        consecutive_misses: self.consecutive_misses,
                    }
                }
            }
        }
    }

    /// Clear the miss streak after the caller chose to keep waiting.
    pub fn reset_misses(&mut self) {
        self.consecutive_misses = 0;
    }

    /// Finalize only at exactly K accepted frames.
    pub fn can_finalize(&self, accepted: usize) -> bool {
        accepted == self.config.required_samples
    }

    /// The aggregate rule applied to the averaged quality score.
    pub fn check_aggregate(&self, aggregate_quality: f32) -> Result<(), GateError> {
        check_threshold(aggregate_quality, self.config.enroll_threshold)
    }
}

/// `score >= threshold`, with non-finite scores always failing.
pub fn check_threshold(score: f32, threshold: f32) -> Result<(), GateError> {
    if score.is_finite() && score >= threshold {
        Ok(())
    } else {
        Err(GateError::QualityTooLow { score, threshold })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(max_misses: u32) -> QualityGate {
        QualityGate::new(GateConfig {
            max_consecutive_misses: max_misses,
            ..GateConfig::default()
        })
    }

    #[test]
    fn test_accepts_at_threshold() {
        let mut g = gate(1);
        assert_eq!(g.judge(Some(0.5)), FrameVerdict::Accepted);
        assert_eq!(g.judge(Some(0.99)), FrameVerdict::Accepted);
    }

    #[test]
    fn test_default_any_miss_is_face_lost() {
        let mut g = gate(DEFAULT_MAX_CONSECUTIVE_MISSES);
        assert_eq!(g.judge(Some(0.49)), FrameVerdict::FaceLost { consecutive_misses: 1 });
        assert_eq!(g.judge(None), FrameVerdict::FaceLost { consecutive_misses: 2 });
    }

    #[test]
    fn test_miss_streak_resets_on_accept() {
        let mut g = gate(3);
        assert_eq!(g.judge(None), FrameVerdict::Rejected { consecutive_misses: 1 });
        assert_eq!(g.judge(Some(0.1)), FrameVerdict::Rejected { consecutive_misses: 2 });
        assert_eq!(g.judge(Some(0.8)), FrameVerdict::Accepted);
        assert_eq!(g.judge(None), FrameVerdict::Rejected { consecutive_misses: 1 });
        assert_eq!(g.judge(None), FrameVerdict::Rejected { consecutive_misses: 2 });
        assert_eq!(g.judge(None), FrameVerdict::FaceLost { consecutive_misses: 3 });
        g.reset_misses();
        assert_eq!(g.judge(None), FrameVerdict::Rejected { consecutive_misses: 1 });
    }

    #[test]
    fn test_nan_quality_is_a_miss() {
        let mut g = gate(2);
        assert_eq!(g.judge(Some(f32::NAN)), FrameVerdict::Rejected { consecutive_misses: 1 });
    }

    #[test]
    fn test_finalize_only_at_exactly_k() {
        let g = gate(1);
        assert!(!g.can_finalize(0));
        assert!(!g.can_finalize(9));
        assert!(g.can_finalize(10));
        assert!(!g.can_finalize(11));
    }

    #[test]
    fn test_aggregate_threshold() {
        let g = QualityGate::new(GateConfig {
            enroll_threshold: 0.7,
            ..GateConfig::default()
        });
        assert!(g.check_aggregate(0.7).is_ok());
        assert_eq!(
            g.check_aggregate(0.65),
            Err(GateError::QualityTooLow { score: 0.65, threshold: 0.7 })
        );
    }

    #[test]
    fn test_validate() {
        assert!(GateConfig::default().validate().is_ok());
        let bad = GateConfig { required_samples: 0, ..GateConfig::default() };
        assert!(bad.validate().is_err());
        let bad = GateConfig { frame_threshold: 1.5, ..GateConfig::default() };
        assert!(bad.validate().is_err());
    }
}
