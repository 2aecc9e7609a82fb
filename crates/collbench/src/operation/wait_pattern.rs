//! Synthetic collectives with a known per-rank delay pattern.
//!
//! No messages are exchanged: each rank spins for its share of time. The
//! slowest rank costs `nprocs` microseconds for the up and down shapes, which
//! makes these useful for checking the cross-process MAX reduction.

use super::{Operation, OperationKind, RunContext, TestParams};
use crate::error::{BenchError, TransportError};
use crate::transport::Communicator;

/// Delay shape across ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitShape {
    /// Rank `i` waits `i + 1` microseconds.
    Up,
    /// Rank `i` waits `nprocs - i` microseconds.
    Down,
    /// Nobody waits.
    Null,
}

impl WaitShape {
    /// Delay of `rank` in a group of `nprocs`, in seconds.
    pub fn delay(self, rank: usize, nprocs: usize) -> f64 {
        let usec = match self {
            WaitShape::Up => rank + 1,
            WaitShape::Down => nprocs.saturating_sub(rank),
            WaitShape::Null => 0,
        };
        usec as f64 * 1e-6
    }
}

/// Spin for a rank-dependent delay.
#[derive(Debug)]
pub struct WaitPattern {
    shape: WaitShape,
    delay: f64,
}

impl WaitPattern {
    /// Pattern with the given shape.
    pub fn new(shape: WaitShape) -> Self {
        Self { shape, delay: 0.0 }
    }
}

impl Operation for WaitPattern {
    fn name(&self) -> &'static str {
        match self.shape {
            WaitShape::Up => "waitpattern-up",
            WaitShape::Down => "waitpattern-down",
            WaitShape::Null => "waitpattern-null",
        }
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Collective
    }

    fn describe(&self) -> &'static str {
        match self.shape {
            WaitShape::Up => "rank i spins (i + 1) usec",
            WaitShape::Down => "rank i spins (nprocs - i) usec",
            WaitShape::Null => "no work; measures scheduling overhead",
        }
    }

    fn init(&mut self, comm: &dyn Communicator, params: &TestParams) -> Result<(), BenchError> {
        self.delay = self.shape.delay(comm.rank(), params.nprocs);
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError> {
        if self.delay > 0.0 {
            ctx.clock.spin_for(self.delay);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shapes() {
        assert_eq!(WaitShape::Up.delay(0, 4), 1e-6);
        assert_eq!(WaitShape::Up.delay(3, 4), 4e-6);
        assert_eq!(WaitShape::Down.delay(0, 4), 4e-6);
        assert_eq!(WaitShape::Down.delay(3, 4), 1e-6);
        assert_eq!(WaitShape::Null.delay(2, 4), 0.0);
    }
}
