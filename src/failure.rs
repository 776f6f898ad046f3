//! Probabilistic request failure injection
//!
//! Each qualifying request draws a uniform sample in `[0, 1)` and is aborted
//! when the sample is at or below the configured probability. A probability
//! of zero never draws.

use rand::Rng;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Source of uniform samples in `[0, 1)`
pub trait Sampler: Send + Sync {
    fn sample(&self) -> f64;
}

/// Thread-local RNG sampler
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSampler;

impl Sampler for ThreadRngSampler {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// A request rejected by the injector
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error(
    "Failing due to probability set to {probability:.2}, got {sample:.2}. Retry your request."
)]
pub struct InjectedFailure {
    pub probability: f64,
    pub sample: f64,
}

#[derive(Clone)]
pub struct FailureInjector {
    probability: f64,
    sampler: Arc<dyn Sampler>,
}

impl FailureInjector {
    pub fn new(probability: f64) -> Self {
        Self::with_sampler(probability, Arc::new(ThreadRngSampler))
    }

    pub fn with_sampler(probability: f64, sampler: Arc<dyn Sampler>) -> Self {
        Self {
            probability,
            sampler,
        }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Decide whether the current request fails
    pub fn should_fail(&self) -> Option<InjectedFailure> {
        should_fail(self.probability, self.sampler.as_ref())
    }
}

impl fmt::Debug for FailureInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureInjector")
            .field("probability", &self.probability)
            .finish()
    }
}

pub fn should_fail(probability: f64, sampler: &dyn Sampler) -> Option<InjectedFailure> {
    if probability <= 0.0 {
        return None;
    }

    let sample = sampler.sample();
    (sample <= probability).then_some(InjectedFailure {
        probability,
        sample,
    })
}
