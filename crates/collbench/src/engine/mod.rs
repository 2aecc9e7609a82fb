//! Staged, time-slot scheduled measurement of one test.
//!
//! A test is a warm-up stage followed by steady stages:
//!
//! 1. **Warm-up**: [`WARMUP_RUNS`] runs without a window, only to estimate
//!    the cost of one run. The slowest process's stage time divided by the
//!    run count, scaled by [`SLOT_LEN_SCALE`], becomes the slot length `L`.
//! 2. **Steady stages** of [`STAGE_RUNS`] runs, each inside its own slot.
//!    Per-run results are reduced across the group (see [`Reduction`]),
//!    invalid runs are dropped from the sample, and the exit policy is
//!    checked. If more than a quarter of a stage's runs were invalid, `L` is
//!    doubled before the next stage.
//!
//! Every run executes in its own transport epoch. A process that starts a
//! run late skips the payload and aborts the epoch, so peers blocked in the
//! same run fail fast instead of waiting for it.

mod overlap;
mod pipelined;

pub use overlap::OverlapOutcome;
pub use pipelined::{run_pipelined, PipelinedOutcome};

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use collbench_core::constants::{
    INVALID_RUNS_THRESHOLD, SLOT_LEN_SCALE, STAGE_RUNS, WARMUP_RUNS,
};
use collbench_core::{ProcessRow, ReportRow, RunStatus, Sample};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{BenchError, ConfigError, TransportError};
use crate::operation::{Operation, OperationKind, Phases, RunContext};
use crate::sync::TimeSlotCoordinator;
use crate::transport::Communicator;

/// Values exchanged per run in the stage reduction.
const RUN_FIELDS: usize = 5;

/// How per-run results of the processes are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Element-wise MAX over every process: the slowest participant
    /// defines the cost of a collective.
    MaxOfAll,
    /// The master's own times; statuses are still MAX-reduced so a
    /// violation on either side invalidates the run.
    MasterOnly,
}

impl From<OperationKind> for Reduction {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::PointToPoint => Reduction::MasterOnly,
            OperationKind::Collective | OperationKind::NonBlocking => Reduction::MaxOfAll,
        }
    }
}

/// Outcome of one run on one process.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RunRecord {
    time: f64,
    phases: Phases,
    status: RunStatus,
}

impl RunRecord {
    fn invalid(status: RunStatus) -> Self {
        Self {
            time: 0.0,
            phases: Phases::default(),
            status,
        }
    }
}

/// Bookkeeping of one steady stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSummary {
    /// Stage number, from 0.
    pub stage: usize,
    /// Runs executed.
    pub runs: usize,
    /// Runs whose reduced status was not valid.
    pub invalid: usize,
    /// Slot length used, in seconds.
    pub slot_len: f64,
    /// RSE of the accumulated sample after this stage.
    pub rse: f64,
    /// Reduced status of each run.
    pub statuses: Vec<RunStatus>,
    /// Status of each run as this process saw it.
    pub local_statuses: Vec<RunStatus>,
}

/// Everything a synchronized test produced on one process.
#[derive(Debug, Clone, Default)]
pub struct TestOutcome {
    /// Runs executed in steady stages.
    pub total_runs: usize,
    /// Runs whose reduced status was valid.
    pub correct_runs: usize,
    /// Reduced times of the correct runs, in run order.
    pub times: Vec<f64>,
    /// Reduced phase timings of the correct runs.
    pub phases: Vec<Phases>,
    /// Online sample over `times`.
    pub sample: Sample,
    /// This process's own local times of the correct runs.
    pub local: Sample,
    /// The same local times, in run order.
    pub local_times: Vec<f64>,
    /// Slot length derived from the warm-up stage.
    pub warmup_slot: f64,
    /// Steady stages in order.
    pub stages: Vec<StageSummary>,
}

impl TestOutcome {
    /// Report row over the reduced times, trimmed as configured.
    pub fn report_row(&self, param: usize, nprocs: usize, config: &Config) -> Result<ReportRow, ConfigError> {
        Ok(ReportRow::from_dataset(
            param,
            nprocs,
            self.total_runs,
            &self.times,
            config.outlier_filter(),
            config.confidence,
            config.time_scale,
        )?)
    }

    /// Row over this process's own times, trimmed like the report row.
    pub fn process_row(
        &self,
        param: usize,
        nprocs: usize,
        rank: usize,
        config: &Config,
    ) -> Result<ProcessRow, ConfigError> {
        Ok(ProcessRow::from_dataset(
            param,
            nprocs,
            rank,
            self.total_runs,
            &self.local_times,
            config.outlier_filter(),
            config.confidence,
            config.time_scale,
        )?)
    }

    /// Mean of each phase over the correct runs.
    pub fn mean_phases(&self) -> Phases {
        if self.phases.is_empty() {
            return Phases::default();
        }
        let n = self.phases.len() as f64;
        let sum = self.phases.iter().fold(Phases::default(), |acc, p| Phases {
            init: acc.init + p.init,
            wait: acc.wait + p.wait,
            comp: acc.comp + p.comp,
        });
        Phases {
            init: sum.init / n,
            wait: sum.wait / n,
            comp: sum.comp / n,
        }
    }
}

/// Drives the stages of synchronized tests on one process.
///
/// Every process of the group must drive the same tests in the same order.
pub struct MeasurementEngine<'a> {
    comm: &'a dyn Communicator,
    clock: Arc<dyn Clock>,
    config: &'a Config,
    slots: TimeSlotCoordinator,
}

impl<'a> MeasurementEngine<'a> {
    /// Synchronize clocks and measure the broadcast guard for a new test.
    ///
    /// Collective over `comm`.
    pub fn initialize(
        comm: &'a dyn Communicator,
        clock: Arc<dyn Clock>,
        config: &'a Config,
    ) -> Result<Self, TransportError> {
        let slots = TimeSlotCoordinator::initialize_test(
            comm,
            Arc::clone(&clock),
            config.master_rank,
            config.clock_sync,
        )?;
        Ok(Self::with_coordinator(comm, clock, config, slots))
    }

    /// Engine over an already initialized coordinator.
    pub fn with_coordinator(
        comm: &'a dyn Communicator,
        clock: Arc<dyn Clock>,
        config: &'a Config,
        slots: TimeSlotCoordinator,
    ) -> Self {
        Self {
            comm,
            clock,
            config,
            slots,
        }
    }

    /// Scheduling state.
    pub fn coordinator(&self) -> &TimeSlotCoordinator {
        &self.slots
    }

    /// Measure `op` until the exit policy is met.
    pub fn run_test(&mut self, op: &mut dyn Operation) -> Result<TestOutcome, BenchError> {
        self.run_with_compute(op, 0.0)
    }

    /// Measure `op`, overlapping each run with `compute` seconds of
    /// simulated computation (non-blocking operations only).
    pub fn run_with_compute(
        &mut self,
        op: &mut dyn Operation,
        compute: f64,
    ) -> Result<TestOutcome, BenchError> {
        let reduction = Reduction::from(op.kind());
        let mut outcome = TestOutcome::default();
        let mut stage_runs = WARMUP_RUNS;
        let mut slot_len = 0.0;
        let mut stage: Option<usize> = None;

        loop {
            self.slots.set_length(slot_len);
            self.slots.set_start_time(self.comm)?;
            let stage_begin = self.clock.now();

            let records: Vec<RunRecord> = (0..stage_runs)
                .map(|_| self.measure_run(op, compute))
                .collect();

            let mut stage_time = [self.clock.now() - stage_begin];
            self.comm.allreduce_max_f64(&mut stage_time)?;
            let stage_time_max = stage_time[0];

            let Some(index) = stage else {
                slot_len = stage_time_max / stage_runs as f64 * SLOT_LEN_SCALE;
                stage_runs = STAGE_RUNS;
                outcome.warmup_slot = slot_len;
                info!(runs = WARMUP_RUNS, slot_len, "warm-up stage finished");
                stage = Some(0);
                continue;
            };

            outcome.total_runs += stage_runs;
            let reduced = self.reduce_stage(reduction, &records)?;
            let mut invalid = 0;
            for (run, (local, global)) in records.iter().zip(&reduced).enumerate() {
                if global.status.is_valid() {
                    outcome.correct_runs += 1;
                    outcome.times.push(global.time);
                    outcome.phases.push(global.phases);
                    outcome.sample.add(global.time);
                    outcome.local.add(local.time);
                    outcome.local_times.push(local.time);
                    trace!(stage = index, run, time = local.time, "measured");
                } else {
                    invalid += 1;
                }
            }
            let rse = outcome.sample.rse();
            info!(stage = index, runs = stage_runs, invalid, rse, "stage finished");
            outcome.stages.push(StageSummary {
                stage: index,
                runs: stage_runs,
                invalid,
                slot_len,
                rse,
                statuses: reduced.iter().map(|r| r.status).collect(),
                local_statuses: records.iter().map(|r| r.status).collect(),
            });

            let (stop, errors) = self.exit_decision(reduction, &outcome, invalid)?;
            if stop {
                break;
            }
            if errors as f64 > stage_runs as f64 * INVALID_RUNS_THRESHOLD {
                slot_len = (2.0 * slot_len).max(stage_time_max / stage_runs as f64 * SLOT_LEN_SCALE);
                info!(slot_len, "slot length corrected");
            }
            stage = Some(index + 1);
        }

        info!(
            runs = outcome.total_runs,
            correct = outcome.correct_runs,
            rse = outcome.sample.rse(),
            "test finished"
        );
        Ok(outcome)
    }

    /// One scheduled run in its own epoch.
    fn measure_run(&mut self, op: &mut dyn Operation, compute: f64) -> RunRecord {
        let epoch = self.comm.begin_epoch();
        let record = match self.slots.start_sync() {
            Err(status) => {
                self.abandon(epoch);
                RunRecord::invalid(status)
            }
            Ok(start) => {
                let mut ctx = RunContext::new(self.comm, self.clock.as_ref());
                ctx.compute = compute;
                match op.run(&mut ctx) {
                    Err(err) => {
                        debug!(epoch, %err, "run failed");
                        self.abandon(epoch);
                        RunRecord::invalid(RunStatus::TransportFailure)
                    }
                    Ok(()) => match self.slots.stop_sync() {
                        Ok(stop) => RunRecord {
                            time: stop - start,
                            phases: ctx.phases,
                            status: RunStatus::Valid,
                        },
                        Err(status) => RunRecord::invalid(status),
                    },
                }
            }
        };
        self.comm.end_epoch();
        record
    }

    fn abandon(&self, epoch: u64) {
        if let Err(err) = self.comm.abort_epoch() {
            warn!(epoch, %err, "could not release peers of an abandoned run");
        }
    }

    /// Combine the stage's records across the group.
    ///
    /// One MAX all-reduction carries times, phases and status codes.
    /// Under [`Reduction::MasterOnly`] every process but the master
    /// contributes zero times, so the MAX yields the master's values.
    fn reduce_stage(
        &self,
        reduction: Reduction,
        records: &[RunRecord],
    ) -> Result<Vec<RunRecord>, TransportError> {
        let contributes = match reduction {
            Reduction::MaxOfAll => true,
            Reduction::MasterOnly => self.comm.rank() == self.config.master_rank,
        };
        let mut values = Vec::with_capacity(records.len() * RUN_FIELDS);
        for r in records {
            if contributes {
                values.extend([r.time, r.phases.init, r.phases.wait, r.phases.comp]);
            } else {
                values.extend([0.0; RUN_FIELDS - 1]);
            }
            values.push(f64::from(r.status.code()));
        }
        self.comm.allreduce_max_f64(&mut values)?;

        Ok(values
            .chunks_exact(RUN_FIELDS)
            .map(|v| RunRecord {
                time: v[0],
                phases: Phases {
                    init: v[1],
                    wait: v[2],
                    comp: v[3],
                },
                status: RunStatus::from_code(v[4] as u32),
            })
            .collect())
    }

    /// Whether to stop, and the invalid-run count driving slot correction.
    ///
    /// For point-to-point tests the master decides and broadcasts both.
    fn exit_decision(
        &self,
        reduction: Reduction,
        outcome: &TestOutcome,
        invalid: usize,
    ) -> Result<(bool, usize), TransportError> {
        let decide = || {
            self.config
                .should_stop(outcome.correct_runs, outcome.total_runs, outcome.sample.rse())
        };
        match reduction {
            Reduction::MaxOfAll => Ok((decide(), invalid)),
            Reduction::MasterOnly => {
                let master = self.config.master_rank;
                let mut flags = [0.0; 2];
                if self.comm.rank() == master {
                    flags = [if decide() { 1.0 } else { 0.0 }, invalid as f64];
                }
                self.comm.broadcast_f64(master, &mut flags)?;
                Ok((flags[0] != 0.0, flags[1] as usize))
            }
        }
    }
}
