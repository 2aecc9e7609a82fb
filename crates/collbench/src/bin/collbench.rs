//! `collbench` command-line driver.
//!
//! Runs one benchmark on an in-process group of `--procs` ranks (one thread
//! each, every rank with its own monotonic clock) and prints the master's
//! report to stdout. Logs go to stderr.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info_span};

use collbench::operation::catalog;
use collbench::{
    parse_size, BenchError, Communicator, ConfidenceLevel, Config, ConfigError, ExitPolicy, JsonSink,
    MonotonicClock, ParamSequence, ReportSink, Runner, Step, SyncAlgorithm, SyncMode, TextSink,
    ThreadGroup, TimeScale,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExitArg {
    /// Stop after a number of correct runs.
    Nruns,
    /// Stop once the relative standard error is small enough.
    Rse,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SyncArg {
    /// Scheduled runs in shared time slots.
    Synctime,
    /// Back-to-back runs, mean only.
    Nosync,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScaleArg {
    Sec,
    Usec,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ClockSyncArg {
    Linear,
    Ring,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

fn size_arg(s: &str) -> Result<usize, String> {
    parse_size(s).map_err(|e| e.to_string())
}

#[derive(Debug, Parser)]
#[command(name = "collbench")]
#[command(about = "Time-slot synchronized benchmark of collective operations")]
#[command(version)]
struct Cli {
    /// Operation to benchmark (see --list).
    #[arg(short, long, value_name = "NAME", default_value = "barrier")]
    bench: String,

    /// List available operations and exit.
    #[arg(short, long)]
    list: bool,

    /// Ranks in the in-process group.
    #[arg(short = 'n', long, value_name = "N", default_value_t = 4,
          value_parser = clap::value_parser!(u32).range(1..))]
    procs: u32,

    /// Smallest element count (accepts KiB/MiB/GiB suffixes).
    #[arg(short = 'x', long, value_name = "SIZE", default_value = "1", value_parser = size_arg)]
    count_min: usize,

    /// Largest element count.
    #[arg(short = 'X', long, value_name = "SIZE", default_value = "256KiB", value_parser = size_arg)]
    count_max: usize,

    /// Count step: `*N` multiplies, `+N` adds.
    #[arg(short = 's', long, value_name = "STEP", default_value = "*2")]
    count_step: Step,

    /// Smallest process count of the sweep (default: --procs).
    #[arg(short = 'p', long, value_name = "N")]
    nprocs_min: Option<usize>,

    /// Largest process count of the sweep (default: --procs).
    #[arg(short = 'P', long, value_name = "N")]
    nprocs_max: Option<usize>,

    /// Process count step.
    #[arg(long, value_name = "STEP", default_value = "+1")]
    nprocs_step: Step,

    /// Test exit condition.
    #[arg(short = 'e', long = "exit", value_enum, default_value_t = ExitArg::Nruns)]
    exit: ExitArg,

    /// Target relative standard error for `--exit rse`.
    #[arg(short = 'E', long, value_name = "RSE", default_value_t = 0.05)]
    rse_max: f64,

    /// Minimum runs per test.
    #[arg(short = 'r', long, value_name = "N", default_value_t = 10)]
    runs_min: usize,

    /// Maximum runs per test.
    #[arg(short = 'R', long, value_name = "N", default_value_t = 100)]
    runs_max: usize,

    /// Correct runs that end a test under `--exit nruns`.
    #[arg(short = 'm', long, value_name = "N", default_value_t = 30)]
    measurements_max: usize,

    /// Confidence level in percent: 90, 95 or 99.
    #[arg(short = 'c', long, value_name = "PERCENT", default_value_t = 95)]
    confidence: u32,

    /// Synchronization of runs.
    #[arg(short = 't', long = "sync", value_enum, default_value_t = SyncArg::Synctime)]
    sync: SyncArg,

    /// Unit of reported times.
    #[arg(short = 'T', long, value_enum, default_value_t = ScaleArg::Usec)]
    timescale: ScaleArg,

    /// Report raw statistics without removing outliers.
    #[arg(short = 'z', long)]
    no_stat_analysis: bool,

    /// Add per-process rows to the report.
    #[arg(short = 'a', long)]
    per_process: bool,

    /// Rotate buffers to defeat the CPU cache.
    #[arg(short = 'w', long)]
    cache_defeat: bool,

    /// Clock synchronization algorithm.
    #[arg(short = 'g', long, value_enum, default_value_t = ClockSyncArg::Linear)]
    clock_sync: ClockSyncArg,

    /// Report format.
    #[arg(short = 'q', long, value_enum, default_value_t = FormatArg::Text)]
    format: FormatArg,

    /// Log level when RUST_LOG is unset.
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    log_level: String,

    /// Show a progress bar.
    #[arg(long)]
    progress: bool,
}

impl Cli {
    fn config(&self) -> Result<Config, ConfigError> {
        let confidence = ConfidenceLevel::from_percent(self.confidence)
            .ok_or(ConfigError::Confidence(self.confidence))?;
        let procs = self.procs as usize;
        let nprocs = match (self.nprocs_min, self.nprocs_max) {
            (None, None) => None,
            (min, max) => Some(ParamSequence::new(
                min.unwrap_or(procs),
                max.unwrap_or(procs),
                self.nprocs_step,
            )),
        };

        let config = Config {
            exit_policy: match self.exit {
                ExitArg::Nruns => ExitPolicy::FixedRuns,
                ExitArg::Rse => ExitPolicy::RelativeStdError,
            },
            measurements_max: self.measurements_max,
            runs_min: self.runs_min,
            runs_max: self.runs_max,
            rse_max: self.rse_max,
            confidence,
            sync_mode: match self.sync {
                SyncArg::Synctime => SyncMode::SyncTime,
                SyncArg::Nosync => SyncMode::NoSync,
            },
            clock_sync: match self.clock_sync {
                ClockSyncArg::Linear => SyncAlgorithm::Linear,
                ClockSyncArg::Ring => SyncAlgorithm::Ring,
            },
            master_rank: 0,
            counts: ParamSequence::new(self.count_min, self.count_max, self.count_step),
            nprocs,
            cache_defeat: self.cache_defeat,
            stat_analysis: !self.no_stat_analysis,
            per_process: self.per_process,
            time_scale: match self.timescale {
                ScaleArg::Sec => TimeScale::Sec,
                ScaleArg::Usec => TimeScale::Usec,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

fn setup_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn print_catalog() {
    for info in catalog() {
        println!("{:<18} {:<24} {}", info.name, info.kind().to_string(), info.describe());
    }
}

fn run(cli: &Cli) -> Result<(), BenchError> {
    let runner = Runner::new(cli.bench.as_str(), cli.config()?).progress(cli.progress);
    let procs = cli.procs as usize;
    runner.validate(procs)?;

    let results = ThreadGroup::new(procs).run(|comm| {
        let span = info_span!("rank", rank = comm.rank());
        let _enter = span.enter();
        runner.run(&comm, Arc::new(MonotonicClock::new()))
    })?;

    let mut report = None;
    for result in results {
        if let Some(r) = result? {
            report = Some(r);
        }
    }
    let Some(report) = report else {
        return Ok(());
    };

    let stdout = io::stdout().lock();
    match cli.format {
        FormatArg::Text => TextSink::new(stdout).write_report(&report),
        FormatArg::Json => JsonSink::new(stdout).write_report(&report),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    if cli.list {
        print_catalog();
        return ExitCode::SUCCESS;
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "benchmark failed");
            eprintln!("collbench: {err}");
            ExitCode::FAILURE
        }
    }
}
