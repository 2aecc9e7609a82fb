//! Fixed-width text report.
//!
//! Header lines start with `#` so the body can be fed straight to plotting
//! tools. Columns are whitespace separated.

use std::io::Write;

use collbench_core::{SampleSummary, TimeScale};

use super::{Report, ReportMode, ReportSink, Row};
use crate::config::{ExitPolicy, SyncMode};
use crate::error::Result;

const RULE: &str = "# ------------------------------------------------------------------";

const LEGEND: &[&str] = &[
    "Param - variable parameter (element count)",
    "Procs - size of the process group",
    "TRuns - total number of runs (valid and invalid)",
    "CRuns - number of correct runs",
    "FRuns - correct runs left after removing outliers",
    "Mean - arithmetic mean of the run time (over FRuns)",
    "RSE - relative standard error (StdErr / Mean)",
    "StdErr - standard error of the mean",
    "Min - smallest run time",
    "Max - largest run time",
    "Err - t_student * StdErr",
    "CI LB - lower bound of the confidence interval: Mean - Err",
    "CI UB - upper bound of the confidence interval: Mean + Err",
    "RelErr - Err / Mean",
];

/// Writes the report as `#`-commented header plus aligned columns.
#[derive(Debug)]
pub struct TextSink<W: Write> {
    out: W,
}

impl<W: Write> TextSink<W> {
    /// Sink writing to `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn header(&mut self, report: &Report) -> Result<()> {
        let c = &report.config;
        writeln!(self.out, "# collbench {} report", env!("CARGO_PKG_VERSION"))?;
        writeln!(self.out, "# Benchmark: {} ({})", report.benchmark, report.kind)?;
        writeln!(
            self.out,
            "# Variable parameter range: min={} max={} step={}",
            c.counts.min, c.counts.max, c.counts.step
        )?;
        match c.exit_policy {
            ExitPolicy::FixedRuns => {
                writeln!(self.out, "# Test exit condition: {} correct runs", c.measurements_max)?
            }
            ExitPolicy::RelativeStdError => writeln!(
                self.out,
                "# Test exit condition: relative standard error <= {:.2}",
                c.rse_max
            )?,
        }
        writeln!(self.out, "# Minimal number of runs: {}", c.runs_min)?;
        writeln!(self.out, "# Maximal number of runs: {}", c.runs_max)?;
        writeln!(self.out, "# Cache defeat: {}", c.cache_defeat)?;
        writeln!(self.out, "# Time scale: {}", c.time_scale.label())?;
        let sync = match c.sync_mode {
            SyncMode::SyncTime => "synctime",
            SyncMode::NoSync => "nosync",
        };
        writeln!(self.out, "# Synchronization method: {sync}")?;
        writeln!(self.out, "# Master process: {}", c.master_rank)?;
        writeln!(self.out, "# Processes: {}", report.world_size)?;
        writeln!(self.out, "# Characteristics of measurements:")?;
        for line in LEGEND {
            writeln!(self.out, "#   {line}")?;
        }
        Ok(())
    }

    fn section(&mut self, title: &str, columns: &str, confidence: Option<u32>) -> Result<()> {
        writeln!(self.out, "#")?;
        writeln!(self.out, "{RULE}")?;
        writeln!(self.out, "# {title}")?;
        if let Some(level) = confidence {
            writeln!(self.out, "# Confidence level (CL): {level}%")?;
        }
        writeln!(self.out, "{RULE}")?;
        writeln!(self.out, "{columns}")?;
        writeln!(self.out, "#")?;
        Ok(())
    }

    fn stats(&mut self, stats: &SampleSummary, precision: usize) -> Result<()> {
        let p = precision;
        write!(
            self.out,
            " {:<12.p$} {:<10.6} {:<12.p$} {:<12.p$} {:<12.p$} {:<12.p$} {:<12.p$} {:<12.p$} {:<10.6}",
            stats.mean,
            stats.rse,
            stats.stderr,
            stats.min,
            stats.max,
            stats.err,
            stats.ci_lower,
            stats.ci_upper,
            stats.rel_err,
        )?;
        writeln!(self.out)?;
        Ok(())
    }
}

const STATS_COLUMNS: &str =
    "[Mean]       [RSE]      [StdErr]     [Min]        [Max]        [Err]        [CI LB]      [CI UB]      [RelErr]";

impl<W: Write> ReportSink for TextSink<W> {
    fn write_report(&mut self, report: &Report) -> Result<()> {
        let c = &report.config;
        let precision = match c.time_scale {
            TimeScale::Sec => 6,
            TimeScale::Usec => 2,
        };
        let confidence = c.confidence.percent();
        self.header(report)?;

        match report.mode {
            ReportMode::Synchronized => {
                let title = if report.kind == crate::operation::OperationKind::PointToPoint {
                    format!("{} time (time of the master process)", report.benchmark)
                } else {
                    format!("{} time (maximum time of all processes)", report.benchmark)
                };
                let columns = format!("# [Param]  [Procs] [TRuns] [CRuns] [FRuns] {STATS_COLUMNS}");
                self.section(&title, &columns, Some(confidence))?;
            }
            ReportMode::Pipelined => {
                let title = format!("{} mean time of back-to-back runs", report.benchmark);
                self.section(&title, "# [Param]  [Procs] [TRuns] [Mean]", None)?;
            }
            ReportMode::Overlap => {
                let title = format!("{} overlap with computation", report.benchmark);
                let columns = "# [Param]  [Procs] [TRuns] [CRuns] [Blocking]   [Total]      [Init]       [Wait]       [Comp]       [Overlap]";
                self.section(&title, columns, None)?;
            }
        }

        for row in &report.rows {
            match row {
                Row::Synchronized(r) => {
                    write!(
                        self.out,
                        "{:<10} {:<7} {:<7} {:<7} {:<7}",
                        r.param, r.nprocs, r.total_runs, r.correct_runs, r.filtered_runs
                    )?;
                    self.stats(&r.stats, precision)?;
                }
                Row::Pipelined(r) => writeln!(
                    self.out,
                    "{:<10} {:<7} {:<7} {:<12.precision$}",
                    r.param, r.nprocs, r.total_runs, r.mean
                )?,
                Row::Overlap(r) => writeln!(
                    self.out,
                    "{:<10} {:<7} {:<7} {:<7} {:<12.p$} {:<12.p$} {:<12.p$} {:<12.p$} {:<12.p$} {:<10.4}",
                    r.param,
                    r.nprocs,
                    r.total_runs,
                    r.correct_runs,
                    r.blocking,
                    r.total,
                    r.init,
                    r.wait,
                    r.comp,
                    r.overlap,
                    p = precision,
                )?,
            }
        }

        if !report.process_rows.is_empty() {
            let title = format!("{} time at a process", report.benchmark);
            let columns =
                format!("# [Param]  [Procs] [Proc]  [TRuns] [CRuns] [FRuns] {STATS_COLUMNS}");
            writeln!(self.out)?;
            self.section(&title, &columns, Some(confidence))?;
            for r in &report.process_rows {
                write!(
                    self.out,
                    "{:<10} {:<7} {:<7} {:<7} {:<7} {:<7}",
                    r.param, r.nprocs, r.rank, r.total_runs, r.correct_runs, r.filtered_runs
                )?;
                self.stats(&r.stats, precision)?;
            }
        }

        writeln!(self.out, "# Elapsed time: {:.6} sec.", report.elapsed)?;
        self.out.flush()?;
        Ok(())
    }
}
