//! # collbench
//!
//! Time-slot synchronized benchmarking of collective and point-to-point
//! operations across a group of cooperating processes with no shared clock.
//!
//! Measuring a collective is only meaningful if every participant starts it
//! at the same instant. collbench gets there in three steps:
//! - estimate every process's clock offset against a root (linear or ring
//!   exchange, RTT-minimizing);
//! - schedule each run into a shared time slot and classify runs that start
//!   late or overrun their slot instead of letting them corrupt the sample;
//! - repeat stages of runs until an exit policy (run count or relative
//!   standard error) is met, widening the slot when too many runs fail.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use collbench::{Config, MonotonicClock, Runner, ThreadGroup, TextSink, ReportSink};
//!
//! let runner = Runner::new("bcast", Config::quick());
//! let reports = ThreadGroup::new(4)
//!     .run(|comm| runner.run(&comm, Arc::new(MonotonicClock::new())))
//!     .unwrap();
//! for report in reports.into_iter().flatten().flatten() {
//!     TextSink::new(std::io::stdout()).write_report(&report).unwrap();
//! }
//! ```
//!
//! Lower-level pieces ([`MeasurementEngine`], [`TimeSlotCoordinator`],
//! [`SyncContext`]) can be driven directly, typically against a
//! [`VirtualClock`] for deterministic results.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
mod config;
mod error;
mod mempool;
mod runner;

// Functional modules
pub mod clock;
pub mod engine;
pub mod operation;
pub mod output;
pub mod sync;
pub mod transport;

// Re-exports for public API
pub use clock::{Clock, MonotonicClock, OffsetClock, VirtualClock};
pub use config::{Config, ExitPolicy, SyncMode};
pub use engine::{MeasurementEngine, OverlapOutcome, PipelinedOutcome, StageSummary, TestOutcome};
pub use error::{AllocationError, BenchError, ConfigError, Result, TransportError};
pub use mempool::MemPool;
pub use operation::{lookup, Operation, OperationKind, RunContext, TestParams};
pub use output::{JsonSink, Report, ReportMode, ReportSink, Row, TextSink};
pub use runner::Runner;
pub use sync::{SyncAlgorithm, SyncContext, TimeSlot, TimeSlotCoordinator};
pub use transport::{Communicator, LocalComm, ThreadGroup};

// Re-export the core crate's data types
pub use collbench_core::{
    parse_size, ConfidenceLevel, OverlapRow, ParamSequence, PipelinedRow, ProcessRow, ReportRow,
    RunStatus, Sample, SampleSummary, Step, TimeScale,
};
