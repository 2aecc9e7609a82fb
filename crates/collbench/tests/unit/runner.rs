//! Benchmark driver, operation registry and report sinks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use collbench::operation::catalog;
use collbench::{
    lookup, Clock, Config, ConfigError, JsonSink, MonotonicClock, OperationKind, ParamSequence, Report,
    ReportMode, ReportSink, Row, Runner, Step, SyncMode, TextSink, ThreadGroup, VirtualClock,
};

fn quick_counts() -> Config {
    Config::quick().counts(ParamSequence::new(1, 4, Step::Mul(2)))
}

/// Run `runner` on a group of `nprocs` virtual-clock ranks, returning the master's report.
fn run_virtual(runner: &Runner, nprocs: usize) -> Report {
    let reports = ThreadGroup::new(nprocs)
        .run(|comm| {
            let clock: Arc<dyn Clock> = Arc::new(VirtualClock::new(0.0));
            runner.run(&comm, clock).unwrap()
        })
        .unwrap();
    let mut reports = reports.into_iter().flatten();
    let report = reports.next().expect("master returns a report");
    assert!(reports.next().is_none(), "only the master returns a report");
    report
}

// =============================================================================
// REGISTRY
// =============================================================================

#[test]
fn every_catalog_entry_resolves() {
    for info in catalog() {
        let op = lookup(info.name).unwrap();
        assert_eq!(op.name(), info.name);
        assert!(!info.describe().is_empty());
    }
}

#[test]
fn lookup_is_case_insensitive() {
    assert_eq!(lookup("AllReduce").unwrap().name(), "allreduce");
}

#[test]
fn unknown_operation_rejected() {
    assert!(matches!(
        lookup("alltoallw"),
        Err(ConfigError::UnknownOperation { .. })
    ));
}

#[test]
fn catalog_covers_every_kind() {
    let kinds: Vec<OperationKind> = catalog().iter().map(|info| info.kind()).collect();
    assert!(kinds.contains(&OperationKind::Collective));
    assert!(kinds.contains(&OperationKind::PointToPoint));
    assert!(kinds.contains(&OperationKind::NonBlocking));
}

// =============================================================================
// RUNNER
// =============================================================================

#[test]
fn fixed_cost_sweep_produces_one_row_per_count() {
    let runner = Runner::new("fixed-cost", quick_counts());
    let report = run_virtual(&runner, 2);

    assert_eq!(report.benchmark, "fixed-cost");
    assert_eq!(report.mode, ReportMode::Synchronized);
    assert_eq!(report.world_size, 2);
    assert_eq!(report.rows.len(), 3);
    for (row, count) in report.rows.iter().zip([1, 2, 4]) {
        let Row::Synchronized(row) = row else {
            panic!("expected a synchronized row, got {:?}", row);
        };
        assert_eq!(row.param, count);
        assert_eq!(row.nprocs, 2);
        assert!(row.correct_runs >= 8);
        // 10 usec per run
        assert!((row.stats.mean - 10.0).abs() < 1e-6, "mean = {}", row.stats.mean);
    }
    assert!(report.process_rows.is_empty());
}

#[test]
fn per_process_rows_cover_every_rank() {
    let runner = Runner::new("fixed-cost", quick_counts().per_process(true));
    let report = run_virtual(&runner, 3);
    assert_eq!(report.process_rows.len(), 3 * 3);
    let mut ranks: Vec<usize> = report.process_rows.iter().map(|r| r.rank).collect();
    ranks.sort_unstable();
    ranks.dedup();
    assert_eq!(ranks, vec![0, 1, 2]);

    for process in &report.process_rows {
        let row = report
            .rows
            .iter()
            .find_map(|row| match row {
                Row::Synchronized(r) if r.param == process.param => Some(r),
                _ => None,
            })
            .expect("process row has a matching test row");
        assert_eq!(process.nprocs, 3);
        assert_eq!(process.total_runs, row.total_runs);
        assert_eq!(process.correct_runs, row.correct_runs);
        assert_eq!(process.filtered_runs, row.filtered_runs);
        assert!(process.filtered_runs <= process.correct_runs);
    }
}

#[test]
fn nprocs_sweep_runs_subgroups() {
    let config = quick_counts()
        .counts(ParamSequence::single(8))
        .nprocs(ParamSequence::new(1, 3, Step::Add(1)));
    let runner = Runner::new("fixed-cost", config);
    let report = run_virtual(&runner, 3);
    let groups: Vec<usize> = report
        .rows
        .iter()
        .map(|row| match row {
            Row::Synchronized(r) => r.nprocs,
            other => panic!("unexpected row {:?}", other),
        })
        .collect();
    assert_eq!(groups, vec![1, 2, 3]);
}

#[test]
fn ranks_outside_the_sweep_wait_past_the_timeout() {
    let timeout = Duration::from_millis(5);
    let config = Config::quick()
        .measurements_max(2000)
        .runs_min(2000)
        .runs_max(4000)
        .counts(ParamSequence::new(1, 4, Step::Mul(2)))
        .nprocs(ParamSequence::single(1));
    let runner = Runner::new("fixed-cost", config);

    let started = Instant::now();
    let reports = ThreadGroup::new(2)
        .timeout(timeout)
        .run(|comm| {
            let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
            runner.run(&comm, clock)
        })
        .unwrap();
    assert!(started.elapsed() > timeout, "sweep finished within the timeout");

    let mut reports = reports.into_iter();
    let report = reports.next().unwrap().unwrap().expect("master returns a report");
    assert_eq!(report.rows.len(), 3);
    assert!(matches!(reports.next(), Some(Ok(None))));
}

#[test]
fn pipelined_mode_reports_means() {
    let runner = Runner::new("fixed-cost", quick_counts().sync_mode(SyncMode::NoSync));
    let report = run_virtual(&runner, 2);
    assert_eq!(report.mode, ReportMode::Pipelined);
    for row in &report.rows {
        let Row::Pipelined(row) = row else {
            panic!("expected a pipelined row, got {:?}", row);
        };
        assert_eq!(row.total_runs, 24);
        assert!((row.mean - 10.0).abs() < 1e-6);
    }
}

#[test]
fn nonblocking_operations_report_overlap() {
    let runner = Runner::new("ibcast", quick_counts());
    let report = run_virtual(&runner, 2);
    assert_eq!(report.mode, ReportMode::Overlap);
    assert!(report.rows.iter().all(|row| matches!(row, Row::Overlap(_))));
}

#[test]
fn validation_rejects_oversized_sweep() {
    let config = quick_counts().nprocs(ParamSequence::new(2, 8, Step::Mul(2)));
    let runner = Runner::new("barrier", config);
    assert!(matches!(
        runner.validate(4),
        Err(ConfigError::NotEnoughProcesses { .. })
    ));
}

// =============================================================================
// SINKS
// =============================================================================

#[test]
fn json_report_written_to_file() {
    let runner = Runner::new("fixed-cost", quick_counts());
    let report = run_virtual(&runner, 2);

    let file = tempfile::NamedTempFile::new().unwrap();
    JsonSink::new(file.reopen().unwrap()).write_report(&report).unwrap();

    let text = std::fs::read_to_string(file.path()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["benchmark"], "fixed-cost");
    assert_eq!(value["mode"], "synchronized");
    assert_eq!(value["rows"].as_array().map(Vec::len), Some(3));
    assert_eq!(value["rows"][0]["type"], "synchronized");
}

#[test]
fn text_report_lists_rows() {
    let runner = Runner::new("fixed-cost", quick_counts());
    let report = run_virtual(&runner, 2);

    let mut sink = TextSink::new(Vec::new());
    sink.write_report(&report).unwrap();
    let text = String::from_utf8(sink.into_inner()).unwrap();

    assert!(text.contains("# Benchmark: fixed-cost"));
    assert!(text.contains("# Processes: 2"));
    let body: Vec<&str> = text
        .lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .collect();
    assert_eq!(body.len(), 3);
    assert!(text.trim_end().ends_with("sec."));
}
