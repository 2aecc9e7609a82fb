//! Benchmark reports and the sinks that write them.
//!
//! Only the master rank holds a [`Report`]; sinks never communicate.

mod json;
mod text;

pub use json::JsonSink;
pub use text::TextSink;

use serde::{Deserialize, Serialize};

use collbench_core::{OverlapRow, PipelinedRow, ProcessRow, ReportRow};

use crate::config::{Config, SyncMode};
use crate::error::Result;
use crate::operation::OperationKind;

/// Shape of the rows a benchmark produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportMode {
    /// Scheduled runs: [`ReportRow`].
    Synchronized,
    /// Back-to-back runs: [`PipelinedRow`].
    Pipelined,
    /// Non-blocking overlap: [`OverlapRow`].
    Overlap,
}

impl ReportMode {
    /// Mode used for `kind` under `sync`.
    pub fn select(kind: OperationKind, sync: SyncMode) -> Self {
        match (kind, sync) {
            (OperationKind::NonBlocking, _) => ReportMode::Overlap,
            (_, SyncMode::NoSync) => ReportMode::Pipelined,
            (_, SyncMode::SyncTime) => ReportMode::Synchronized,
        }
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Row {
    /// Scheduled test.
    Synchronized(ReportRow),
    /// Pipelined test.
    Pipelined(PipelinedRow),
    /// Overlap test.
    Overlap(OverlapRow),
}

/// Full benchmark report, as held by the master rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Operation name.
    pub benchmark: String,
    /// Operation class.
    pub kind: OperationKind,
    /// Row shape.
    pub mode: ReportMode,
    /// Processes available to the benchmark.
    pub world_size: usize,
    /// Configuration the benchmark ran with.
    pub config: Config,
    /// One row per tested (process count, parameter) pair.
    pub rows: Vec<Row>,
    /// Per-process rows, when requested.
    pub process_rows: Vec<ProcessRow>,
    /// Wall time of the whole benchmark on the master, in seconds.
    pub elapsed: f64,
}

/// Destination of a finished report.
pub trait ReportSink {
    /// Write `report` in full.
    fn write_report(&mut self, report: &Report) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_selection() {
        use OperationKind::*;
        assert_eq!(ReportMode::select(Collective, SyncMode::SyncTime), ReportMode::Synchronized);
        assert_eq!(ReportMode::select(Collective, SyncMode::NoSync), ReportMode::Pipelined);
        assert_eq!(ReportMode::select(NonBlocking, SyncMode::NoSync), ReportMode::Overlap);
        assert_eq!(ReportMode::select(PointToPoint, SyncMode::SyncTime), ReportMode::Synchronized);
    }

    #[test]
    fn test_row_is_tagged() {
        let row = Row::Pipelined(PipelinedRow {
            param: 8,
            nprocs: 2,
            total_runs: 100,
            mean: 1.5,
        });
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["type"], "pipelined");
        assert_eq!(json["param"], 8);
    }
}
