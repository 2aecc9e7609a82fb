//! Benchmark configuration.
//!
//! Controls how many runs a test may take, when it is considered converged,
//! how runs are synchronized, and how results are reported.

use serde::{Deserialize, Serialize};

use collbench_core::constants::{
    DEFAULT_COUNT_MAX, DEFAULT_MEASUREMENTS_MAX, DEFAULT_RSE_MAX, DEFAULT_RUNS_MAX,
    DEFAULT_RUNS_MIN, TRIM_LOWER_PERCENT, TRIM_UPPER_PERCENT,
};
use collbench_core::{ConfidenceLevel, ParamSequence, Step, TimeScale};

use crate::error::ConfigError;
use crate::sync::SyncAlgorithm;

/// When a synchronized test stops adding stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitPolicy {
    /// Stop once enough correct runs (or the run cap) are reached,
    /// but never before `runs_min` runs.
    #[default]
    FixedRuns,
    /// Stop once the relative standard error drops below `rse_max` with at
    /// least `runs_min` correct runs, or when the run cap is hit.
    RelativeStdError,
}

/// How runs are timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Every run starts at a common scheduled instant on all processes.
    #[default]
    SyncTime,
    /// Runs are issued back-to-back and only their average is reported.
    NoSync,
}

/// Configuration of a benchmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // =========================================================================
    // Exit condition
    // =========================================================================
    /// Convergence rule for synchronized tests. Default: [`ExitPolicy::FixedRuns`].
    pub exit_policy: ExitPolicy,

    /// Correct runs after which [`ExitPolicy::FixedRuns`] may stop. Default: 30.
    pub measurements_max: usize,

    /// Minimum number of runs per test. Default: 10.
    ///
    /// Under [`ExitPolicy::RelativeStdError`] this counts correct runs.
    pub runs_min: usize,

    /// Hard cap on runs per test, and the batch size of pipelined tests.
    /// Default: 100.
    pub runs_max: usize,

    /// Target relative standard error for [`ExitPolicy::RelativeStdError`].
    /// Default: 0.05.
    pub rse_max: f64,

    /// Confidence level of reported intervals. Default: 95%.
    pub confidence: ConfidenceLevel,

    // =========================================================================
    // Synchronization
    // =========================================================================
    /// Scheduled or pipelined runs. Default: [`SyncMode::SyncTime`].
    pub sync_mode: SyncMode,

    /// Clock offset estimation algorithm. Default: [`SyncAlgorithm::Linear`].
    pub clock_sync: SyncAlgorithm,

    /// Rank acting as clock root, reduction target and report writer. Default: 0.
    pub master_rank: usize,

    // =========================================================================
    // Parameter sweep
    // =========================================================================
    /// Element counts to test. Default: `1..=262144`, doubling.
    pub counts: ParamSequence,

    /// Process-group sizes to test. `None` tests the whole group only.
    pub nprocs: Option<ParamSequence>,

    // =========================================================================
    // Buffers and reporting
    // =========================================================================
    /// Rotate operation buffers across cache-line-separated blocks. Default: off.
    pub cache_defeat: bool,

    /// Drop the lowest and highest quartile of correct runs before computing
    /// reported statistics. Default: on.
    pub stat_analysis: bool,

    /// Also report each process's own local timings. Default: off.
    pub per_process: bool,

    /// Unit of reported times. Default: microseconds.
    pub time_scale: TimeScale,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exit_policy: ExitPolicy::FixedRuns,
            measurements_max: DEFAULT_MEASUREMENTS_MAX,
            runs_min: DEFAULT_RUNS_MIN,
            runs_max: DEFAULT_RUNS_MAX,
            rse_max: DEFAULT_RSE_MAX,
            confidence: ConfidenceLevel::P95,
            sync_mode: SyncMode::SyncTime,
            clock_sync: SyncAlgorithm::Linear,
            master_rank: 0,
            counts: ParamSequence::new(1, DEFAULT_COUNT_MAX, Step::Mul(2)),
            nprocs: None,
            cache_defeat: false,
            stat_analysis: true,
            per_process: false,
            time_scale: TimeScale::Usec,
        }
    }
}

impl Config {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Few runs, for smoke tests.
    ///
    /// - measurements_max: 10
    /// - runs_min: 8
    /// - runs_max: 24
    pub fn quick() -> Self {
        Self {
            measurements_max: 10,
            runs_min: 8,
            runs_max: 24,
            ..Self::default()
        }
    }

    /// Run until the mean is tight.
    ///
    /// - exit_policy: RelativeStdError
    /// - rse_max: 0.01
    /// - runs_max: 1000
    pub fn thorough() -> Self {
        Self {
            exit_policy: ExitPolicy::RelativeStdError,
            rse_max: 0.01,
            runs_max: 1000,
            ..Self::default()
        }
    }

    /// Set the exit policy.
    pub fn exit_policy(mut self, policy: ExitPolicy) -> Self {
        self.exit_policy = policy;
        self
    }

    /// Set the correct-run target of [`ExitPolicy::FixedRuns`].
    pub fn measurements_max(mut self, n: usize) -> Self {
        assert!(n > 0, "measurements_max must be > 0");
        self.measurements_max = n;
        self
    }

    /// Set the minimum number of runs.
    pub fn runs_min(mut self, n: usize) -> Self {
        assert!(n > 0, "runs_min must be > 0");
        self.runs_min = n;
        self
    }

    /// Set the maximum number of runs.
    pub fn runs_max(mut self, n: usize) -> Self {
        assert!(n > 0, "runs_max must be > 0");
        self.runs_max = n;
        self
    }

    /// Set the target relative standard error.
    pub fn rse_max(mut self, rse: f64) -> Self {
        assert!(rse > 0.0 && rse <= 1.0, "rse_max must be in (0, 1]");
        self.rse_max = rse;
        self
    }

    /// Set the confidence level.
    pub fn confidence(mut self, level: ConfidenceLevel) -> Self {
        self.confidence = level;
        self
    }

    /// Set the synchronization mode.
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Set the clock synchronization algorithm.
    pub fn clock_sync(mut self, algorithm: SyncAlgorithm) -> Self {
        self.clock_sync = algorithm;
        self
    }

    /// Set the master rank.
    pub fn master_rank(mut self, rank: usize) -> Self {
        self.master_rank = rank;
        self
    }

    /// Set the element-count sweep.
    pub fn counts(mut self, counts: ParamSequence) -> Self {
        assert!(!counts.is_empty(), "counts must not be empty");
        self.counts = counts;
        self
    }

    /// Set the process-count sweep.
    pub fn nprocs(mut self, nprocs: ParamSequence) -> Self {
        assert!(nprocs.min > 0, "nprocs must start at 1 or more");
        self.nprocs = Some(nprocs);
        self
    }

    /// Enable or disable cache defeat.
    pub fn cache_defeat(mut self, enabled: bool) -> Self {
        self.cache_defeat = enabled;
        self
    }

    /// Enable or disable outlier removal in reports.
    pub fn stat_analysis(mut self, enabled: bool) -> Self {
        self.stat_analysis = enabled;
        self
    }

    /// Enable or disable per-process rows.
    pub fn per_process(mut self, enabled: bool) -> Self {
        self.per_process = enabled;
        self
    }

    /// Set the report time unit.
    pub fn time_scale(mut self, scale: TimeScale) -> Self {
        self.time_scale = scale;
        self
    }

    /// Percentages trimmed from each end of the dataset, if enabled.
    pub fn outlier_filter(&self) -> Option<(u32, u32)> {
        self.stat_analysis
            .then_some((TRIM_LOWER_PERCENT, TRIM_UPPER_PERCENT))
    }

    /// Whether a synchronized test with these counts may stop.
    pub fn should_stop(&self, correct_runs: usize, total_runs: usize, rse: f64) -> bool {
        match self.exit_policy {
            ExitPolicy::FixedRuns => {
                (correct_runs >= self.measurements_max || total_runs >= self.runs_max)
                    && total_runs >= self.runs_min
            }
            ExitPolicy::RelativeStdError => {
                (rse <= self.rse_max && correct_runs >= self.runs_min)
                    || total_runs >= self.runs_max
            }
        }
    }

    /// Check values that bypass the builder (e.g. from the command line or serde).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runs_min == 0 || self.runs_max == 0 || self.runs_min > self.runs_max {
            return Err(ConfigError::RunBounds {
                min: self.runs_min,
                max: self.runs_max,
            });
        }
        if self.measurements_max == 0 {
            return Err(ConfigError::RunBounds {
                min: self.measurements_max,
                max: self.runs_max,
            });
        }
        if !(self.rse_max > 0.0 && self.rse_max <= 1.0) {
            return Err(ConfigError::Rse(self.rse_max));
        }
        check_sequence("count", &self.counts)?;
        if let Some(nprocs) = &self.nprocs {
            check_sequence("nprocs", nprocs)?;
            if nprocs.min == 0 {
                return Err(ConfigError::Range {
                    what: "nprocs",
                    detail: "process count must be at least 1".into(),
                });
            }
        }
        Ok(())
    }
}

fn check_sequence(what: &'static str, seq: &ParamSequence) -> Result<(), ConfigError> {
    if seq.is_empty() {
        return Err(ConfigError::Range {
            what,
            detail: format!("min {} exceeds max {}", seq.min, seq.max),
        });
    }
    if seq.min < seq.max && !seq.step.is_progressive() {
        return Err(ConfigError::Range {
            what,
            detail: format!("step {} never reaches {}", seq.step, seq.max),
        });
    }
    if seq.min == 0 && seq.min < seq.max && matches!(seq.step, Step::Mul(_)) {
        return Err(ConfigError::Range {
            what,
            detail: format!("step {} never leaves 0", seq.step),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documentation() {
        let config = Config::default();
        assert_eq!(config.measurements_max, 30);
        assert_eq!(config.runs_min, 10);
        assert_eq!(config.runs_max, 100);
        assert_eq!(config.rse_max, 0.05);
        assert_eq!(config.confidence, ConfidenceLevel::P95);
        assert_eq!(config.sync_mode, SyncMode::SyncTime);
        assert_eq!(config.counts.len(), 19);
        assert_eq!(config.outlier_filter(), Some((25, 25)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fixed_runs_exit() {
        let config = Config::default();
        assert!(!config.should_stop(8, 8, 0.0), "below runs_min");
        assert!(!config.should_stop(24, 24, 0.0));
        assert!(config.should_stop(32, 32, 0.5));
        assert!(config.should_stop(0, 104, 0.0), "run cap reached");
        let strict = Config::default().runs_min(50);
        assert!(!strict.should_stop(32, 32, 0.0), "runs_min still binds");
    }

    #[test]
    fn test_rse_exit() {
        let config = Config::default().exit_policy(ExitPolicy::RelativeStdError);
        assert!(!config.should_stop(8, 8, 0.0), "needs runs_min correct runs");
        assert!(config.should_stop(16, 16, 0.01));
        assert!(!config.should_stop(16, 16, 0.2));
        assert!(config.should_stop(3, 104, 0.2), "run cap reached");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.runs_min = 200;
        assert!(matches!(config.validate(), Err(ConfigError::RunBounds { .. })));

        let mut config = Config::default();
        config.rse_max = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::Rse(0.0)));

        let mut config = Config::default();
        config.counts = ParamSequence::new(1, 64, Step::Mul(1));
        assert!(matches!(config.validate(), Err(ConfigError::Range { what: "count", .. })));
    }

    #[test]
    fn test_validate_rejects_multiplying_from_zero() {
        let config = Config::default().counts(ParamSequence::new(0, 1024, Step::Mul(2)));
        assert!(matches!(config.validate(), Err(ConfigError::Range { what: "count", .. })));

        let config = Config::default().counts(ParamSequence::single(0));
        assert_eq!(config.validate(), Ok(()));
        let config = Config::default().counts(ParamSequence::new(0, 1024, Step::Add(256)));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = Config::thorough().per_process(true);
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
