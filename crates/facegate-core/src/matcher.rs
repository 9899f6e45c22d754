//! Gallery search: nearest enrolled descriptor within an acceptance radius.

use crate::types::{Descriptor, DescriptorError, GalleryEntry};
use serde::Serialize;
use thiserror::Error;

/// Default acceptance radius (Euclidean distance; lower is stricter).
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;
/// Distances closer than this to the minimum count as a tie.
pub const DEFAULT_TIE_EPSILON: f32 = 1e-6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("invalid probe descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),
}

/// A gallery entry close enough to the probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub identity_id: String,
    pub descriptor_id: String,
    pub distance: f32,
    /// Display-only: `max(0, 1 - distance / threshold)`.
    pub confidence: f32,
}

/// Result of identifying one probe.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Match(Candidate),
    /// Nothing within the radius. `nearest_distance` is `None` for an empty gallery.
    NoMatch { nearest_distance: Option<f32> },
    /// Several identities share the minimum distance; none is picked.
    Ambiguous { distance: f32, candidates: Vec<Candidate> },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Match(_))
    }
}

/// Strategy for comparing a probe against the enrolled gallery.
pub trait Matcher {
    fn identify(&self, probe: &Descriptor, gallery: &[GalleryEntry]) -> MatchOutcome;
}

/// Linear Euclidean search.
///
/// Every gallery entry is visited; there is no early exit on a close hit, so
/// timing does not reveal where in the gallery the match sits.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
    pub tie_epsilon: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            tie_epsilon: DEFAULT_TIE_EPSILON,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(threshold: f32, tie_epsilon: f32) -> Self {
        Self { threshold, tie_epsilon }
    }

    /// Monotonically decreasing in distance; 1.0 at distance zero.
    pub fn confidence(&self, distance: f32) -> f32 {
        if self.threshold <= 0.0 {
            return if distance == 0.0 { 1.0 } else { 0.0 };
        }
        (1.0 - distance / self.threshold).max(0.0)
    }

    /// Validate a raw probe vector, then identify it.
    pub fn identify_raw(&self, probe: Vec<f32>, gallery: &[GalleryEntry]) -> Result<MatchOutcome, MatchError> {
        let probe = Descriptor::new(probe)?;
        Ok(self.identify(&probe, gallery))
    }

    fn candidate(&self, entry: &GalleryEntry, distance: f32) -> Candidate {
        Candidate {
            identity_id: entry.identity_id.clone(),
            descriptor_id: entry.descriptor_id.clone(),
            distance,
            confidence: self.confidence(distance),
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn identify(&self, probe: &Descriptor, gallery: &[GalleryEntry]) -> MatchOutcome {
        let distances: Vec<f32> = gallery
            .iter()
            .map(|entry| probe.euclidean_distance(&entry.descriptor))
            .collect();

        let Some(best) = distances.iter().copied().min_by(f32::total_cmp) else {
            return MatchOutcome::NoMatch { nearest_distance: None };
        };

        if best > self.threshold {
            return MatchOutcome::NoMatch {
                nearest_distance: Some(best),
            };
        }

        let mut tied: Vec<Candidate> = gallery
            .iter()
            .zip(&distances)
            .filter(|(_, &d)| d - best <= self.tie_epsilon)
            .map(|(entry, &d)| self.candidate(entry, d))
            .collect();

        if tied.len() > 1 {
            tracing::warn!(
                distance = best,
                candidates = tied.len(),
                "ambiguous match; refusing to pick"
            );
            return MatchOutcome::Ambiguous {
                distance: best,
                candidates: tied,
            };
        }

        match tied.pop() {
            Some(candidate) => MatchOutcome::Match(candidate),
            None => MatchOutcome::NoMatch {
                nearest_distance: Some(best),
            },
        }
    }
}
