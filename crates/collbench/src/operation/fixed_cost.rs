//! A payload with a scripted cost.

use std::fmt;

use super::{Operation, OperationKind, RunContext, TestParams};
use crate::error::{BenchError, TransportError};
use crate::transport::Communicator;

const DEFAULT_COST: f64 = 10e-6;

type CostFn = Box<dyn FnMut(usize) -> f64 + Send>;

/// Spins on the clock for a cost chosen per invocation.
///
/// Against a [`VirtualClock`](crate::clock::VirtualClock) the measured time
/// of a run equals the scripted cost exactly.
pub struct FixedCost {
    cost: CostFn,
    invocations: usize,
}

impl FixedCost {
    /// Every invocation costs `seconds`.
    pub fn new(seconds: f64) -> Self {
        Self::with_schedule(move |_| seconds)
    }

    /// Invocation `i` (counted from zero over the lifetime of the instance)
    /// costs `schedule(i)` seconds.
    pub fn with_schedule<F>(schedule: F) -> Self
    where
        F: FnMut(usize) -> f64 + Send + 'static,
    {
        Self {
            cost: Box::new(schedule),
            invocations: 0,
        }
    }

    /// Payload executions so far.
    pub fn invocations(&self) -> usize {
        self.invocations
    }
}

impl Default for FixedCost {
    fn default() -> Self {
        Self::new(DEFAULT_COST)
    }
}

impl fmt::Debug for FixedCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedCost")
            .field("invocations", &self.invocations)
            .finish_non_exhaustive()
    }
}

impl Operation for FixedCost {
    fn name(&self) -> &'static str {
        "fixed-cost"
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Collective
    }

    fn describe(&self) -> &'static str {
        "spins for a fixed time without communicating"
    }

    fn init(&mut self, _comm: &dyn Communicator, _params: &TestParams) -> Result<(), BenchError> {
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError> {
        let cost = (self.cost)(self.invocations);
        self.invocations += 1;
        ctx.clock.spin_for(cost);
        Ok(())
    }
}
