//! Sweeps a benchmark over process counts and element counts.
//!
//! For each process count `p` the group is split into its first `p` ranks;
//! the sub-group then runs one test per element count while the remaining
//! ranks wait at a barrier. The master collects the rows into a [`Report`].

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, info_span};

use collbench_core::{ParamSequence, ProcessRow};

use crate::clock::Clock;
use crate::config::{Config, SyncMode};
use crate::engine::{run_pipelined, MeasurementEngine};
use crate::error::{ConfigError, Result};
use crate::operation::{lookup, Operation, OperationKind, TestParams};
use crate::output::{Report, ReportMode, Row};
use crate::transport::Communicator;

/// A named benchmark and its configuration.
#[derive(Debug, Clone)]
pub struct Runner {
    operation: String,
    config: Config,
    progress: bool,
}

impl Runner {
    /// Benchmark of the registered operation `operation`.
    pub fn new(operation: impl Into<String>, config: Config) -> Self {
        Self {
            operation: operation.into(),
            config,
            progress: false,
        }
    }

    /// Show a progress bar on the master rank.
    pub fn progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn nprocs(&self, world_size: usize) -> ParamSequence {
        self.config
            .nprocs
            .unwrap_or_else(|| ParamSequence::single(world_size))
    }

    /// Reject configurations that cannot run on `world_size` processes.
    pub fn validate(&self, world_size: usize) -> std::result::Result<(), ConfigError> {
        self.config.validate()?;
        let op = lookup(&self.operation)?;
        let kind = op.kind();

        if self.config.sync_mode == SyncMode::NoSync && !kind.supports_pipelined() {
            return Err(ConfigError::PipelinedUnsupported {
                op: op.name().to_string(),
            });
        }

        let nprocs = self.nprocs(world_size);
        if nprocs.max > world_size {
            return Err(ConfigError::NotEnoughProcesses {
                op: op.name().to_string(),
                needed: nprocs.max,
                available: world_size,
            });
        }
        if self.config.master_rank >= nprocs.min {
            return Err(ConfigError::NotEnoughProcesses {
                op: "master rank".to_string(),
                needed: self.config.master_rank + 1,
                available: nprocs.min,
            });
        }
        if op.min_procs() > nprocs.min {
            return Err(ConfigError::NotEnoughProcesses {
                op: op.name().to_string(),
                needed: op.min_procs(),
                available: nprocs.min,
            });
        }
        Ok(())
    }

    /// Run the whole sweep.
    ///
    /// Collective over `comm`. Returns the report on the master rank and
    /// `None` everywhere else.
    pub fn run(&self, comm: &dyn Communicator, clock: Arc<dyn Clock>) -> Result<Option<Report>> {
        self.validate(comm.size())?;
        let config = &self.config;
        let started = clock.now();
        let is_master = comm.rank() == config.master_rank;

        let op = lookup(&self.operation)?;
        let (name, kind) = (op.name(), op.kind());
        let mode = ReportMode::select(kind, config.sync_mode);
        let nprocs_seq = self.nprocs(comm.size());

        let bar = (is_master && self.progress).then(|| {
            let bar = ProgressBar::new((nprocs_seq.len() * config.counts.len()) as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | {msg}")
            {
                bar.set_style(style.progress_chars("=>-"));
            }
            bar
        });

        let mut rows = Vec::new();
        let mut process_rows = Vec::new();
        for nprocs in &nprocs_seq {
            if let Some(group) = comm.split(nprocs)? {
                for count in &config.counts {
                    let span = info_span!("test", nprocs, count);
                    let _enter = span.enter();
                    info!("test started");
                    if let Some(bar) = &bar {
                        bar.set_message(format!("{name} nprocs={nprocs} count={count}"));
                    }

                    let params = TestParams {
                        count,
                        nprocs,
                        cache_defeat: config.cache_defeat,
                        master: config.master_rank,
                    };
                    let (row, local) = self.run_test(group.as_ref(), &clock, mode, &params)?;
                    if is_master {
                        rows.push(row);
                    }
                    if config.per_process {
                        let bytes = serde_json::to_vec(&local)?;
                        if let Some(parts) = group.gather_bytes(config.master_rank, &bytes)? {
                            for part in parts {
                                process_rows.push(serde_json::from_slice::<ProcessRow>(&part)?);
                            }
                        }
                    }
                    if let Some(bar) = &bar {
                        bar.inc(1);
                    }
                }
            }
            comm.barrier()?;
        }

        if let Some(bar) = bar {
            bar.finish_with_message(format!("{name} finished"));
        }
        let elapsed = clock.now() - started;
        info!(elapsed, "benchmark finished");

        Ok(is_master.then(|| Report {
            benchmark: name.to_string(),
            kind,
            mode,
            world_size: comm.size(),
            config: config.clone(),
            rows,
            process_rows,
            elapsed,
        }))
    }

    fn run_test(
        &self,
        comm: &dyn Communicator,
        clock: &Arc<dyn Clock>,
        mode: ReportMode,
        params: &TestParams,
    ) -> Result<(Row, ProcessRow)> {
        let mut op = lookup(&self.operation)?;
        op.init(comm, params)?;
        let measured = self.measure(comm, clock, mode, op.as_mut(), params);
        op.teardown();
        measured
    }

    fn measure(
        &self,
        comm: &dyn Communicator,
        clock: &Arc<dyn Clock>,
        mode: ReportMode,
        op: &mut dyn Operation,
        params: &TestParams,
    ) -> Result<(Row, ProcessRow)> {
        let config = &self.config;
        let (count, nprocs, rank) = (params.count, params.nprocs, comm.rank());
        match mode {
            ReportMode::Synchronized => {
                let mut engine = MeasurementEngine::initialize(comm, Arc::clone(clock), config)?;
                let outcome = engine.run_test(op)?;
                Ok((
                    Row::Synchronized(outcome.report_row(count, nprocs, config)?),
                    outcome.process_row(count, nprocs, rank, config)?,
                ))
            }
            ReportMode::Pipelined => {
                let outcome = run_pipelined(comm, clock.as_ref(), config, op)?;
                let local = ProcessRow::from_dataset(
                    count,
                    nprocs,
                    rank,
                    outcome.runs,
                    &[outcome.local_mean],
                    None,
                    config.confidence,
                    config.time_scale,
                )
                .map_err(ConfigError::from)?;
                Ok((Row::Pipelined(outcome.report_row(count, nprocs, config)), local))
            }
            ReportMode::Overlap => {
                debug_assert_eq!(op.kind(), OperationKind::NonBlocking);
                let mut engine = MeasurementEngine::initialize(comm, Arc::clone(clock), config)?;
                let outcome = engine.run_overlap(op)?;
                Ok((
                    Row::Overlap(outcome.report_row(count, nprocs, config)),
                    outcome.overlap.process_row(count, nprocs, rank, config)?,
                ))
            }
        }
    }
}
