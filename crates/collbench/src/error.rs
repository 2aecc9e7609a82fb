//! Error types.
//!
//! Faults inside a single measured run never surface as errors: the engine
//! folds a [`TransportError`] raised by the operation under test into
//! [`RunStatus::TransportFailure`](collbench_core::RunStatus) and carries on.
//! Everything else (bad configuration, buffer setup, a broken group outside
//! a run) is a [`BenchError`] and aborts the benchmark.

use thiserror::Error;

use collbench_core::{ParseError, TrimError};

/// Failure of a message exchange between processes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No matching message arrived within the receive timeout.
    #[error("timed out waiting for a message from rank {peer}")]
    Timeout {
        /// Rank we were waiting on.
        peer: usize,
    },

    /// The peer's endpoint is gone.
    #[error("rank {peer} disconnected")]
    Disconnected {
        /// Rank that went away.
        peer: usize,
    },

    /// A peer abandoned the current run epoch (started late or failed).
    #[error("run aborted by rank {peer}")]
    Aborted {
        /// Rank that abandoned the run.
        peer: usize,
    },

    /// A payload did not have the expected size.
    #[error("malformed message: expected {expected} bytes, got {got}")]
    Truncated {
        /// Expected payload length.
        expected: usize,
        /// Received payload length.
        got: usize,
    },

    /// A rank outside the group was addressed.
    #[error("rank {rank} is out of range for a group of {size}")]
    InvalidRank {
        /// Requested rank.
        rank: usize,
        /// Group size.
        size: usize,
    },

    /// The operation under test reported a failure of its own.
    #[error("operation failed: {0}")]
    Failed(String),
}

/// Buffer setup failure. Fatal for the whole benchmark.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// The allocator could not provide the requested bytes.
    #[error("not enough memory for a {requested}-byte buffer pool")]
    Exhausted {
        /// Bytes requested.
        requested: usize,
    },
}

/// Invalid benchmark configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Minimum runs exceed maximum runs, or a bound is zero.
    #[error("invalid run bounds: min={min}, max={max}")]
    RunBounds {
        /// Minimum runs.
        min: usize,
        /// Maximum runs.
        max: usize,
    },

    /// Target RSE outside (0, 1].
    #[error("target RSE must be in (0, 1], got {0}")]
    Rse(f64),

    /// Confidence level other than 90/95/99.
    #[error("confidence level must be 90, 95 or 99, got {0}")]
    Confidence(u32),

    /// Empty or non-progressive parameter range.
    #[error("invalid {what} range: {detail}")]
    Range {
        /// Which sweep.
        what: &'static str,
        /// What is wrong with it.
        detail: String,
    },

    /// Pipelined mode requested for a test that needs scheduling.
    #[error("{op} cannot be measured without time-slot synchronization")]
    PipelinedUnsupported {
        /// Operation name.
        op: String,
    },

    /// No operation registered under this name.
    #[error("unknown benchmark: {name}")]
    UnknownOperation {
        /// Requested name.
        name: String,
    },

    /// The group is too small for the operation or the master rank.
    #[error("{op} needs at least {needed} processes, only {available} available")]
    NotEnoughProcesses {
        /// Operation name (or "master rank").
        op: String,
        /// Processes required.
        needed: usize,
        /// Processes available.
        available: usize,
    },

    /// Outlier filter percentages sum above 100.
    #[error(transparent)]
    Trim(#[from] TrimError),

    /// Unparseable size literal.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Top-level benchmark error.
#[derive(Debug, Error)]
pub enum BenchError {
    /// Configuration rejected before any measurement.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Buffer setup failed.
    #[error("allocation failure: {0}")]
    Allocation(#[from] AllocationError),

    /// Group-level communication failed outside a measured run.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Report output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for benchmark-level operations.
pub type Result<T> = std::result::Result<T, BenchError>;
