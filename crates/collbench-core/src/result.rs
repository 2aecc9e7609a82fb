//! Report rows produced at the end of every test.
//!
//! All times are already converted to the requested [`TimeScale`]; RSE and
//! relative error are unitless.

use serde::{Deserialize, Serialize};

use crate::statistics::{trim_extremes, ConfidenceLevel, Sample, TrimError};
use crate::types::TimeScale;

/// Descriptive statistics of one (possibly trimmed) dataset.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SampleSummary {
    /// Arithmetic mean.
    pub mean: f64,
    /// Relative standard error (`stderr / mean`).
    pub rse: f64,
    /// Standard error of the mean.
    pub stderr: f64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Half width of the confidence interval (`t * stderr`).
    pub err: f64,
    /// Lower confidence bound.
    pub ci_lower: f64,
    /// Upper confidence bound.
    pub ci_upper: f64,
    /// `err / mean`, or 0 when `err` is 0.
    pub rel_err: f64,
}

impl SampleSummary {
    /// Summarize a sample, scaling times by `scale`.
    ///
    /// An empty sample yields the all-zero summary.
    pub fn from_sample(sample: &Sample, level: ConfidenceLevel, scale: TimeScale) -> Self {
        if sample.is_empty() {
            return Self::default();
        }
        let k = scale.factor();
        let ci = sample.confidence_interval(level);
        let mean = sample.mean() * k;
        let err = ci.err * k;
        Self {
            mean,
            rse: sample.rse(),
            stderr: sample.std_err() * k,
            min: sample.min() * k,
            max: sample.max() * k,
            err,
            ci_lower: ci.lower * k,
            ci_upper: ci.upper * k,
            rel_err: if err > 0.0 { err / mean } else { 0.0 },
        }
    }
}

/// One row per parameter value of a synchronized test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    /// Value of the variable parameter (e.g. element count).
    pub param: usize,
    /// Size of the process group that ran the test.
    pub nprocs: usize,
    /// Runs executed, valid or not.
    pub total_runs: usize,
    /// Runs whose reduced status was valid.
    pub correct_runs: usize,
    /// Correct runs left after outlier removal.
    pub filtered_runs: usize,
    /// Statistics over the filtered runs.
    #[serde(flatten)]
    pub stats: SampleSummary,
}

impl ReportRow {
    /// Degenerate row for a test without a single correct run.
    pub fn zero(param: usize, nprocs: usize, total_runs: usize) -> Self {
        Self {
            param,
            nprocs,
            total_runs,
            correct_runs: 0,
            filtered_runs: 0,
            stats: SampleSummary::default(),
        }
    }

    /// Build a row from the per-run reduced times (in seconds).
    ///
    /// When `filter` is set, the given lower/upper percentages are trimmed
    /// from the sorted dataset before the statistics are computed.
    pub fn from_dataset(
        param: usize,
        nprocs: usize,
        total_runs: usize,
        times: &[f64],
        filter: Option<(u32, u32)>,
        level: ConfidenceLevel,
        scale: TimeScale,
    ) -> Result<Self, TrimError> {
        if times.is_empty() {
            return Ok(Self::zero(param, nprocs, total_runs));
        }
        let sample = match filter {
            Some((lower, upper)) => Sample::from_slice(&trim_extremes(times, lower, upper)?),
            None => Sample::from_slice(times),
        };
        Ok(Self {
            param,
            nprocs,
            total_runs,
            correct_runs: times.len(),
            filtered_runs: sample.count(),
            stats: SampleSummary::from_sample(&sample, level, scale),
        })
    }
}

/// Statistics of one process's own local times for one parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRow {
    /// Value of the variable parameter.
    pub param: usize,
    /// Size of the process group that ran the test.
    pub nprocs: usize,
    /// Rank of the process within the test group.
    pub rank: usize,
    /// Runs executed, valid or not.
    pub total_runs: usize,
    /// Correct runs observed by this process.
    pub correct_runs: usize,
    /// Correct runs left after outlier removal.
    pub filtered_runs: usize,
    /// Statistics over this process's filtered local times.
    #[serde(flatten)]
    pub stats: SampleSummary,
}

impl ProcessRow {
    /// Build a row from one process's local times of the correct runs,
    /// trimmed the same way as [`ReportRow::from_dataset`].
    #[allow(clippy::too_many_arguments)]
    pub fn from_dataset(
        param: usize,
        nprocs: usize,
        rank: usize,
        total_runs: usize,
        times: &[f64],
        filter: Option<(u32, u32)>,
        level: ConfidenceLevel,
        scale: TimeScale,
    ) -> Result<Self, TrimError> {
        let row = ReportRow::from_dataset(param, nprocs, total_runs, times, filter, level, scale)?;
        Ok(Self {
            param,
            nprocs,
            rank,
            total_runs,
            correct_runs: row.correct_runs,
            filtered_runs: row.filtered_runs,
            stats: row.stats,
        })
    }
}

/// One row per parameter value of a pipelined (unsynchronized) test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelinedRow {
    /// Value of the variable parameter.
    pub param: usize,
    /// Size of the process group.
    pub nprocs: usize,
    /// Back-to-back runs executed.
    pub total_runs: usize,
    /// Mean time per run, scaled.
    pub mean: f64,
}

/// Communication/computation overlap of a non-blocking operation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OverlapRow {
    /// Value of the variable parameter.
    pub param: usize,
    /// Size of the process group.
    pub nprocs: usize,
    /// Runs executed in the overlap pass.
    pub total_runs: usize,
    /// Correct runs in the overlap pass.
    pub correct_runs: usize,
    /// Mean blocking time (initiation immediately followed by wait), scaled.
    pub blocking: f64,
    /// Mean total time with simulated computation, scaled.
    pub total: f64,
    /// Mean initiation time, scaled.
    pub init: f64,
    /// Mean wait time, scaled.
    pub wait: f64,
    /// Mean simulated computation time, scaled.
    pub comp: f64,
    /// Fraction of communication hidden behind computation, in `[0, 1]`.
    pub overlap: f64,
}

impl OverlapRow {
    /// Overlap ratio `1 - (total - comp) / blocking`, clamped to `[0, 1]`.
    pub fn overlap_ratio(blocking: f64, total: f64, comp: f64) -> f64 {
        if blocking <= 0.0 {
            return 0.0;
        }
        (1.0 - (total - comp) / blocking).clamp(0.0, 1.0)
    }
}
