//! Unsynchronized (pipelined) measurement.
//!
//! Runs are issued back-to-back without slots, so only their average cost
//! is observable. Cheaper than scheduling when a run is short compared to
//! the synchronization overhead, at the price of pipelining effects between
//! consecutive collectives.

use tracing::debug;

use collbench_core::PipelinedRow;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{BenchError, ConfigError};
use crate::operation::{Operation, RunContext};
use crate::transport::Communicator;

/// Result of a pipelined test on one process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelinedOutcome {
    /// Back-to-back runs executed.
    pub runs: usize,
    /// This process's mean time per run, in seconds.
    pub local_mean: f64,
    /// MAX of `local_mean` over the group, in seconds.
    pub mean: f64,
}

impl PipelinedOutcome {
    /// Report row with the mean in the configured unit.
    pub fn report_row(&self, param: usize, nprocs: usize, config: &Config) -> PipelinedRow {
        PipelinedRow {
            param,
            nprocs,
            total_runs: self.runs,
            mean: self.mean * config.time_scale.factor(),
        }
    }
}

/// One warm-up run, a barrier, then `config.runs_max` runs back-to-back.
///
/// Collective over `comm`. Fails with [`ConfigError::PipelinedUnsupported`]
/// for operations that need scheduled runs.
pub fn run_pipelined(
    comm: &dyn Communicator,
    clock: &dyn Clock,
    config: &Config,
    op: &mut dyn Operation,
) -> Result<PipelinedOutcome, BenchError> {
    if !op.kind().supports_pipelined() {
        return Err(ConfigError::PipelinedUnsupported {
            op: op.name().to_string(),
        }
        .into());
    }

    let mut ctx = RunContext::new(comm, clock);
    op.run(&mut ctx)?;
    comm.barrier()?;

    let runs = config.runs_max;
    let start = clock.now();
    for _ in 0..runs {
        op.run(&mut ctx)?;
    }
    let local_mean = (clock.now() - start) / runs as f64;

    let mut mean = [local_mean];
    comm.allreduce_max_f64(&mut mean)?;
    debug!(runs, local_mean, mean = mean[0], "pipelined test finished");

    Ok(PipelinedOutcome {
        runs,
        local_mean,
        mean: mean[0],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::operation::{lookup, FixedCost};
    use crate::transport::ThreadGroup;

    #[test]
    fn test_mean_of_fixed_cost() {
        let means = ThreadGroup::new(2)
            .run(|comm| {
                let clock = VirtualClock::new(0.0);
                let config = Config::default().runs_max(50);
                let mut op = FixedCost::new(1e-3);
                run_pipelined(&comm, &clock, &config, &mut op).unwrap()
            })
            .unwrap();
        for out in means {
            assert_eq!(out.runs, 50);
            assert!((out.mean - 1e-3).abs() < 1e-9, "mean = {}", out.mean);
        }
    }

    #[test]
    fn test_point_to_point_is_rejected() {
        let results = ThreadGroup::new(2)
            .run(|comm| {
                let clock = VirtualClock::new(0.0);
                let mut op = lookup("send").unwrap();
                run_pipelined(&comm, &clock, &Config::default(), op.as_mut()).err()
            })
            .unwrap();
        for err in results {
            assert!(matches!(
                err,
                Some(BenchError::Config(ConfigError::PipelinedUnsupported { .. }))
            ));
        }
    }
}
