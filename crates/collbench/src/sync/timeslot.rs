//! Time-window scheduling of measured runs.
//!
//! At the start of each stage the root picks a reference instant a little
//! in the future (far enough that its broadcast reaches everyone in time),
//! and every process converts it to its own clock. Run `i` of the stage then
//! owns the window `[stage_start + i·L, stage_start + (i+1)·L)`. A run that
//! cannot start at its instant, or does not finish inside its window, is
//! classified instead of being aborted.

use std::sync::Arc;

use tracing::debug;

use collbench_core::constants::{BCAST_MEASURE_REPS, BCAST_OVERHEAD};
use collbench_core::RunStatus;

use super::{SyncAlgorithm, SyncContext};
use crate::clock::Clock;
use crate::error::TransportError;
use crate::transport::Communicator;

/// Schedule of the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimeSlot {
    /// Local instant at which slot 0 begins.
    pub stage_start: f64,
    /// Window length `L` in seconds; zero disables windowing.
    pub length: f64,
    /// Index of the next slot handed out by `start_sync`.
    pub index: usize,
}

impl TimeSlot {
    /// Start instant of slot `index`.
    pub fn start_of(&self, index: usize) -> f64 {
        self.stage_start + self.length * index as f64
    }
}

/// Per-test scheduling state of one process.
pub struct TimeSlotCoordinator {
    clock: Arc<dyn Clock>,
    sync: SyncContext,
    bcast_guard: f64,
    slot: TimeSlot,
    slot_start: f64,
}

impl TimeSlotCoordinator {
    /// Synchronize clocks against `root` and bound the broadcast cost.
    ///
    /// Collective over `comm`.
    pub fn initialize_test(
        comm: &dyn Communicator,
        clock: Arc<dyn Clock>,
        root: usize,
        algorithm: SyncAlgorithm,
    ) -> Result<Self, TransportError> {
        let started = clock.now();
        let sync = SyncContext::synchronize(comm, clock.as_ref(), root, algorithm)?;
        debug!(
            nprocs = comm.size(),
            root,
            elapsed = clock.now() - started,
            offset = sync.offset(),
            "clock synchronization finished"
        );

        let bcast_guard = measure_bcast_time(comm, clock.as_ref(), root)? * BCAST_OVERHEAD;
        debug!(bcast_guard, "broadcast guard measured");

        Ok(Self::with_sync(clock, sync, bcast_guard))
    }

    /// Build a coordinator from an existing synchronization.
    pub fn with_sync(clock: Arc<dyn Clock>, sync: SyncContext, bcast_guard: f64) -> Self {
        Self {
            clock,
            sync,
            bcast_guard,
            slot: TimeSlot::default(),
            slot_start: 0.0,
        }
    }

    /// Clock synchronization used for this test.
    pub fn sync(&self) -> &SyncContext {
        &self.sync
    }

    /// Delay added by the root before the first slot of a stage.
    pub fn bcast_guard(&self) -> f64 {
        self.bcast_guard
    }

    /// Current schedule.
    pub fn slot(&self) -> TimeSlot {
        self.slot
    }

    /// Set the window length for the coming stage.
    ///
    /// A zero length disables windowing: the first run still waits for the
    /// stage start, later runs start immediately and are never classified.
    pub fn set_length(&mut self, length: f64) {
        self.slot.length = length.max(0.0);
    }

    /// Agree on the stage start instant and reset the slot index.
    ///
    /// Collective over `comm`. Returns the local stage start.
    pub fn set_start_time(&mut self, comm: &dyn Communicator) -> Result<f64, TransportError> {
        comm.barrier()?;
        let root = self.sync.root();
        let mut start = [0.0];
        if comm.rank() == root {
            start[0] = self.clock.now() + self.bcast_guard;
        }
        comm.broadcast_f64(root, &mut start)?;

        self.slot.stage_start = self.sync.to_local(start[0]);
        self.slot.index = 0;
        Ok(self.slot.stage_start)
    }

    /// Wait for the next slot and return its start instant.
    ///
    /// Fails with [`RunStatus::StartedLate`] if the slot has already begun;
    /// the caller must then skip the payload.
    pub fn start_sync(&mut self) -> Result<f64, RunStatus> {
        let index = self.slot.index;
        let target = self.slot.start_of(index);
        self.slot.index += 1;

        if self.slot.length <= 0.0 {
            self.slot_start = if index == 0 {
                self.clock.spin_until(target)
            } else {
                self.clock.now()
            };
            return Ok(self.slot_start);
        }

        if self.clock.now() > target {
            return Err(RunStatus::StartedLate);
        }
        self.slot_start = self.clock.spin_until(target);
        Ok(self.slot_start)
    }

    /// Close the current slot and return the stop instant.
    ///
    /// Fails with [`RunStatus::Overran`] if more than `L` elapsed since the
    /// matching [`start_sync`](Self::start_sync).
    pub fn stop_sync(&mut self) -> Result<f64, RunStatus> {
        let now = self.clock.now();
        if self.slot.length > 0.0 && now - self.slot_start > self.slot.length {
            return Err(RunStatus::Overran);
        }
        Ok(now)
    }
}

/// Upper bound on one single-double broadcast from `root`.
///
/// One warm-up call, then the MAX over [`BCAST_MEASURE_REPS`] barrier-aligned
/// calls of the slowest process. The bound is only meaningful on `root`.
pub fn measure_bcast_time(
    comm: &dyn Communicator,
    clock: &dyn Clock,
    root: usize,
) -> Result<f64, TransportError> {
    let mut value = [0.0];
    comm.broadcast_f64(root, &mut value)?;

    let mut bound: f64 = 0.0;
    for _ in 0..BCAST_MEASURE_REPS {
        comm.barrier()?;
        let t = clock.now();
        comm.broadcast_f64(root, &mut value)?;
        let mut elapsed = [clock.now() - t];
        comm.reduce_max_f64(root, &mut elapsed)?;
        bound = bound.max(elapsed[0]);
    }
    Ok(bound)
}
