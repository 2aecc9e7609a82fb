//! Cross-process time agreement.
//!
//! - [`SyncContext`]: offset of the local clock relative to a root process
//! - [`TimeSlotCoordinator`]: shared schedule of run windows built on that offset

mod clock_sync;
mod timeslot;

pub use clock_sync::{SyncAlgorithm, SyncContext};
pub use timeslot::{measure_bcast_time, TimeSlot, TimeSlotCoordinator};
