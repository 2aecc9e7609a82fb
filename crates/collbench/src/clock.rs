//! Injectable time sources.
//!
//! All scheduling in collbench reads time through the [`Clock`] trait so that
//! the busy-wait loops (slot start, RTT exchange, simulated computation) can
//! run against a [`VirtualClock`] in tests. Times are `f64` seconds since an
//! arbitrary per-clock epoch; clocks of different processes are not assumed
//! to agree.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A monotonic source of time in seconds.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> f64;

    /// Busy-wait until `deadline` and return the time observed on exit.
    ///
    /// Returns immediately if the deadline has already passed.
    fn spin_until(&self, deadline: f64) -> f64 {
        loop {
            let t = self.now();
            if t >= deadline {
                return t;
            }
            std::hint::spin_loop();
        }
    }

    /// Busy-wait for `duration` seconds and return the time observed on exit.
    fn spin_for(&self, duration: f64) -> f64 {
        let start = self.now();
        self.spin_until(start + duration)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> f64 {
        (**self).now()
    }

    fn spin_until(&self, deadline: f64) -> f64 {
        (**self).spin_until(deadline)
    }

    fn spin_for(&self, duration: f64) -> f64 {
        (**self).spin_for(duration)
    }
}

/// Wall clock backed by [`Instant`], with its epoch at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Create a clock whose zero is now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// A clock that reads another clock shifted by a constant.
///
/// Used to emulate processes whose clocks disagree by a known amount.
pub struct OffsetClock {
    inner: Arc<dyn Clock>,
    offset: f64,
}

impl OffsetClock {
    /// Wrap `inner`, reporting `inner.now() + offset`.
    pub fn new(inner: Arc<dyn Clock>, offset: f64) -> Self {
        Self { inner, offset }
    }

    /// The injected shift.
    pub fn offset(&self) -> f64 {
        self.offset
    }
}

impl Clock for OffsetClock {
    fn now(&self) -> f64 {
        self.inner.now() + self.offset
    }

    fn spin_until(&self, deadline: f64) -> f64 {
        self.inner.spin_until(deadline - self.offset) + self.offset
    }
}

/// A manually driven clock.
///
/// Time only moves when the owner calls [`advance`](VirtualClock::advance)
/// or when something spins on it: waiting jumps straight to the deadline.
/// This makes an operation that "costs" 1 ms cost exactly 1 ms.
#[derive(Debug, Default)]
pub struct VirtualClock {
    bits: AtomicU64,
}

impl VirtualClock {
    /// Create a clock reading `start`.
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    /// Move time forward by `delta` seconds.
    pub fn advance(&self, delta: f64) {
        let now = self.now();
        self.set(now + delta.max(0.0));
    }

    fn set(&self, t: f64) {
        self.bits.store(t.to_bits(), Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }

    fn spin_until(&self, deadline: f64) -> f64 {
        let now = self.now();
        if deadline > now {
            self.set(deadline);
            deadline
        } else {
            now
        }
    }
}
