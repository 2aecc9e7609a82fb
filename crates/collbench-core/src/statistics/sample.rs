//! Incremental sample statistics.
//!
//! Only running sums are kept; raw values are never retained, so a
//! [`Sample`] can be updated after every run for free and queried for
//! convergence at the end of each stage.

use serde::{Deserialize, Serialize};

use super::ConfidenceLevel;
use crate::math;

/// Running accumulator of a one-dimensional sample.
///
/// # Example
///
/// ```
/// use collbench_core::statistics::Sample;
///
/// let mut sample = Sample::new();
/// for x in [1.0, 2.0, 3.0, 4.0, 5.0] {
///     sample.add(x);
/// }
/// assert!((sample.mean() - 3.0).abs() < 1e-12);
/// assert!((sample.variance() - 2.5).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
    min_index: Option<usize>,
    max_index: Option<usize>,
    count: usize,
}

/// Symmetric confidence interval around the sample mean.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    /// Lower bound: `mean - err`.
    pub lower: f64,
    /// Upper bound: `mean + err`.
    pub upper: f64,
    /// Half width: `t * stderr`.
    pub err: f64,
}

impl Default for Sample {
    fn default() -> Self {
        Self::new()
    }
}

impl Sample {
    /// Create an empty sample.
    pub fn new() -> Self {
        Self {
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::MAX,
            max: 0.0,
            min_index: None,
            max_index: None,
            count: 0,
        }
    }

    /// Build a sample from a complete dataset.
    pub fn from_slice(data: &[f64]) -> Self {
        let mut sample = Self::new();
        sample.add_all(data);
        sample
    }

    /// Add one observation.
    pub fn add(&mut self, x: f64) {
        self.sum += x;
        self.sum_sq += x * x;
        if x < self.min {
            self.min = x;
            self.min_index = Some(self.count);
        }
        if x > self.max {
            self.max = x;
            self.max_index = Some(self.count);
        }
        self.count += 1;
    }

    /// Add every observation of a dataset, in order.
    pub fn add_all(&mut self, data: &[f64]) {
        for &x in data {
            self.add(x);
        }
    }

    /// Reset to the empty state.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Number of observations.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether no observation has been added.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Arithmetic mean, or 0 for an empty sample.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Unbiased sample variance: `sum_sq/(n-1) - sum^2/(n(n-1))`.
    ///
    /// Zero for fewer than two observations. Cancellation can push the
    /// expression slightly below zero for constant data; it is clamped.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let var = self.sum_sq / (n - 1.0) - self.sum * self.sum / (n * (n - 1.0));
        var.max(0.0)
    }

    /// Sample standard deviation.
    pub fn std_dev(&self) -> f64 {
        math::sqrt(self.variance())
    }

    /// Standard error of the mean: `sqrt(variance / n)`.
    pub fn std_err(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        math::sqrt(self.variance() / self.count as f64)
    }

    /// Relative standard error `stderr / mean`; zero when stderr is zero.
    pub fn rse(&self) -> f64 {
        let se = self.std_err();
        if se > 0.0 {
            se / self.mean()
        } else {
            0.0
        }
    }

    /// Smallest observation, or 0 for an empty sample.
    pub fn min(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }

    /// Largest observation, or 0 for an empty sample.
    pub fn max(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.max
        }
    }

    /// Insertion index of the first minimum.
    pub fn min_index(&self) -> Option<usize> {
        self.min_index
    }

    /// Insertion index of the first maximum.
    pub fn max_index(&self) -> Option<usize> {
        self.max_index
    }

    /// Confidence interval `mean ± t(n-1, level) * stderr`.
    ///
    /// An empty sample yields an all-zero interval; a single observation
    /// yields a zero-width interval at that value.
    pub fn confidence_interval(&self, level: ConfidenceLevel) -> ConfidenceInterval {
        let mean = self.mean();
        if self.count < 2 {
            return ConfidenceInterval {
                lower: mean,
                upper: mean,
                err: 0.0,
            };
        }
        let err = self.std_err() * level.t_value(self.count - 1);
        ConfidenceInterval {
            lower: mean - err,
            upper: mean + err,
            err,
        }
    }
}
