//! Communication/computation overlap of non-blocking operations.

use collbench_core::{OverlapRow, ReportRow};

use super::{MeasurementEngine, TestOutcome};
use crate::config::Config;
use crate::error::{BenchError, ConfigError};
use crate::operation::{Operation, OperationKind};

/// The two passes of an overlap measurement.
#[derive(Debug, Clone, Default)]
pub struct OverlapOutcome {
    /// Pass with wait issued right after initiation.
    pub blocking: TestOutcome,
    /// Pass with simulated computation between initiation and wait.
    pub overlap: TestOutcome,
}

impl OverlapOutcome {
    /// Mean blocking time in seconds; the computation length of the
    /// overlap pass.
    pub fn blocking_time(&self) -> f64 {
        self.blocking.sample.mean()
    }

    /// Overlap row with times in the configured unit.
    pub fn report_row(&self, param: usize, nprocs: usize, config: &Config) -> OverlapRow {
        let k = config.time_scale.factor();
        let blocking = self.blocking_time();
        let total = self.overlap.sample.mean();
        let phases = self.overlap.mean_phases();
        OverlapRow {
            param,
            nprocs,
            total_runs: self.overlap.total_runs,
            correct_runs: self.overlap.correct_runs,
            blocking: blocking * k,
            total: total * k,
            init: phases.init * k,
            wait: phases.wait * k,
            comp: phases.comp * k,
            overlap: OverlapRow::overlap_ratio(blocking, total, phases.comp),
        }
    }

    /// Statistics of the blocking pass as a regular row.
    pub fn blocking_row(&self, param: usize, nprocs: usize, config: &Config) -> Result<ReportRow, ConfigError> {
        self.blocking.report_row(param, nprocs, config)
    }
}

impl MeasurementEngine<'_> {
    /// Measure a non-blocking operation without, then with, simulated
    /// computation as long as its mean blocking time.
    pub fn run_overlap(&mut self, op: &mut dyn Operation) -> Result<OverlapOutcome, BenchError> {
        debug_assert_eq!(op.kind(), OperationKind::NonBlocking);
        let blocking = self.run_with_compute(op, 0.0)?;
        let compute = blocking.sample.mean();
        tracing::debug!(compute, "blocking pass finished");
        let overlap = self.run_with_compute(op, compute)?;
        Ok(OverlapOutcome { blocking, overlap })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Phases;
    use collbench_core::Sample;

    fn outcome(times: &[f64], phases: Phases) -> TestOutcome {
        TestOutcome {
            total_runs: times.len(),
            correct_runs: times.len(),
            times: times.to_vec(),
            phases: vec![phases; times.len()],
            sample: Sample::from_slice(times),
            ..TestOutcome::default()
        }
    }

    #[test]
    fn test_full_overlap() {
        let out = OverlapOutcome {
            blocking: outcome(&[1e-3; 8], Phases::default()),
            overlap: outcome(
                &[1e-3; 8],
                Phases {
                    init: 0.0,
                    wait: 0.0,
                    comp: 1e-3,
                },
            ),
        };
        let row = out.report_row(4, 2, &Config::default());
        assert!((row.overlap - 1.0).abs() < 1e-9);
        assert!((row.blocking - 1000.0).abs() < 1e-6, "usec scale");
    }

    #[test]
    fn test_no_overlap() {
        let out = OverlapOutcome {
            blocking: outcome(&[1e-3; 8], Phases::default()),
            overlap: outcome(
                &[2e-3; 8],
                Phases {
                    init: 0.0,
                    wait: 1e-3,
                    comp: 1e-3,
                },
            ),
        };
        let row = out.report_row(4, 2, &Config::default());
        assert!(row.overlap.abs() < 1e-9);
        assert_eq!(row.correct_runs, 8);
    }
}
