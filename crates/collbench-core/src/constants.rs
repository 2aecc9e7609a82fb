//! Constants shared by the measurement engine and the report layer.

/// Number of back-to-back runs in the warm-up stage.
pub const WARMUP_RUNS: usize = 4;

/// Number of scheduled runs in every steady stage.
pub const STAGE_RUNS: usize = 8;

/// Multiplier applied to the observed per-run cost when deriving a slot length.
pub const SLOT_LEN_SCALE: f64 = 1.1;

/// Safety margin applied to the measured broadcast cost.
pub const BCAST_OVERHEAD: f64 = 1.2;

/// Number of timed broadcasts used to bound the broadcast cost.
pub const BCAST_MEASURE_REPS: usize = 3;

/// A stage whose invalid-run fraction exceeds this triggers slot widening.
pub const INVALID_RUNS_THRESHOLD: f64 = 0.25;

/// Clock sync stops after this many exchanges without a new RTT minimum.
pub const SYNC_STABLE_ITERS: usize = 100;

/// Hard cap on clock-sync exchanges per peer.
///
/// Stops a peer pair whose round-trip time keeps shrinking forever
/// (e.g. a slowly draining congested link) from stalling the test.
pub const SYNC_MAX_ITERS: usize = 10_000;

/// Percentage of the smallest values dropped by the report filter.
pub const TRIM_LOWER_PERCENT: u32 = 25;

/// Percentage of the largest values dropped by the report filter.
pub const TRIM_UPPER_PERCENT: u32 = 25;

/// Largest degrees of freedom covered by the Student's t table.
pub const T_TABLE_MAX_DF: usize = 100;

/// Default cap on correct measurements under the fixed-runs exit policy.
pub const DEFAULT_MEASUREMENTS_MAX: usize = 30;

/// Default minimum number of runs per test.
pub const DEFAULT_RUNS_MIN: usize = 10;

/// Default maximum number of runs per test.
pub const DEFAULT_RUNS_MAX: usize = 100;

/// Default target relative standard error.
pub const DEFAULT_RSE_MAX: f64 = 0.05;

/// Default upper bound of the count sequence (256 KiB).
pub const DEFAULT_COUNT_MAX: usize = 1 << 18;

/// Cache line size assumed by the buffer pool.
pub const CACHE_LINE_SIZE: usize = 64;

/// Number of rotating blocks handed out when cache defeat is enabled.
pub const MEMPOOL_BLOCKS: usize = 4;

/// Alignment of every buffer-pool block.
pub const MEMPOOL_ALIGN: usize = 32;
