//! Statistical primitives used for convergence decisions and reporting.
//!
//! - [`Sample`]: O(1) incremental accumulator (mean, variance, stderr, RSE, CI)
//! - [`ConfidenceLevel`]: two-tailed Student's t lookup
//! - [`trim_extremes`]: batch outlier removal applied once per test

mod sample;
mod student_t;
mod trim;

pub use sample::{ConfidenceInterval, Sample};
pub use student_t::ConfidenceLevel;
pub use trim::{trim_extremes, TrimError};
