//! Core arithmetic and data types for time-slot synchronized benchmarking.
//!
//! This crate holds everything in collbench that does not touch a clock or a
//! transport: the incremental [`Sample`] accumulator, Student's t confidence
//! intervals, outlier trimming, run classification codes, parameter
//! sequences, and the report rows produced at the end of every test.
//!
//! It is designed to work in `no_std` environments with only an allocator,
//! so the same statistics can be linked into constrained benchmark agents.
//!
//! # Features
//!
//! - `std` (default): Enable standard library support (`std::error::Error` impls)
//!
//! # Usage
//!
//! ```
//! use collbench_core::statistics::{ConfidenceLevel, Sample};
//!
//! let mut sample = Sample::new();
//! for t in [1.0e-3, 1.1e-3, 0.9e-3, 1.0e-3] {
//!     sample.add(t);
//! }
//! let ci = sample.confidence_interval(ConfidenceLevel::P95);
//! assert!(ci.lower <= sample.mean() && sample.mean() <= ci.upper);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod constants;
pub mod math;
pub mod params;
pub mod result;
pub mod statistics;
pub mod types;

// Re-export commonly used items at crate root
pub use params::{parse_size, ParamSequence, ParseError, Step};
pub use result::{OverlapRow, PipelinedRow, ProcessRow, ReportRow, SampleSummary};
pub use statistics::{trim_extremes, ConfidenceInterval, ConfidenceLevel, Sample, TrimError};
pub use types::{RunStatus, TimeScale};
