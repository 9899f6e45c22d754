//! Reduce K accepted samples to one representative descriptor.

use crate::types::{Descriptor, DESCRIPTOR_DIM};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregateError {
    #[error("insufficient samples: collected {collected} of {required}")]
    InsufficientSamples { collected: usize, required: usize },
    #[error("aggregator already holds {required} samples")]
    Full { required: usize },
}

/// The averaged descriptor and the mean per-frame quality.
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub descriptor: Descriptor,
    pub quality_score: f32,
    pub sample_count: usize,
}

/// Collects exactly `required` samples in arrival order.
#[derive(Debug)]
pub struct DescriptorAggregator {
    required: usize,
    samples: Vec<(Descriptor, f32)>,
}

impl DescriptorAggregator {
    pub fn new(required: usize) -> Self {
        Self {
            required,
            samples: Vec::with_capacity(required),
        }
    }

    pub fn push(&mut self, descriptor: Descriptor, quality_score: f32) -> Result<usize, AggregateError> {
        if self.samples.len() >= self.required {
            return Err(AggregateError::Full {
                required: self.required,
            });
        }
        self.samples.push((descriptor, quality_score));
        Ok(self.samples.len())
    }

    pub fn collected(&self) -> usize {
        self.samples.len()
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn is_complete(&self) -> bool {
        self.required > 0 && self.samples.len() == self.required
    }

    /// Component-wise mean of the vectors and mean of the quality scores.
    ///
    /// Consumes the aggregator; on error nothing is produced.
    pub fn finalize(self) -> Result<Aggregate, AggregateError> {
        if !self.is_complete() {
            return Err(AggregateError::InsufficientSamples {
                collected: self.samples.len(),
                required: self.required,
            });
        }
        average(&self.samples)
    }
}

/// Mean over `samples`, accumulated in f64 so the result does not depend on
/// sample order beyond rounding of the final cast.
fn average(samples: &[(Descriptor, f32)]) -> Result<Aggregate, AggregateError> {
    if samples.is_empty() {
        return Err(AggregateError::InsufficientSamples {
            collected: 0,
            required: 1,
        });
    }

    let mut sums = [0.0f64; DESCRIPTOR_DIM];
    let mut quality_sum = 0.0f64;
    for (descriptor, quality) in samples {
        for (acc, v) in sums.iter_mut().zip(descriptor.as_slice()) {
            *acc += f64::from(*v);
        }
        quality_sum += f64::from(*quality);
    }

    let n = samples.len() as f64;
    let values: Vec<f32> = sums.iter().map(|s| (s / n) as f32).collect();
    Ok(Aggregate {
        // The mean of finite 128-d vectors is a finite 128-d vector.
        descriptor: Descriptor::from_validated(values),
        quality_score: (quality_sum / n) as f32,
        sample_count: samples.len(),
    })
}
