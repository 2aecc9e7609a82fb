//! Operations under test.
//!
//! An [`Operation`] is the payload the engine times: it is set up once per
//! test with [`Operation::init`], invoked once per run between the slot start
//! and stop instants with [`Operation::run`], and released with
//! [`Operation::teardown`]. Built-in operations are looked up by name through
//! [`lookup`].

mod collective;
mod fixed_cost;
mod nbc;
mod p2p;
mod wait_pattern;

pub use collective::{Allgather, Allreduce, Alltoall, Barrier, Bcast, Gather, Reduce, Scatter};
pub use fixed_cost::FixedCost;
pub use nbc::{Ibarrier, Ibcast};
pub use p2p::{SendOnly, SendRecv};
pub use wait_pattern::{WaitPattern, WaitShape};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{AllocationError, BenchError, ConfigError, TransportError};
use crate::mempool::MemPool;
use crate::transport::{Communicator, Request};

/// Number of request polls spread over one simulated computation.
const COMPUTE_POLL_SLICES: u32 = 100;

/// How run timings of an operation are combined across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Every process participates; a run costs as much as its slowest process.
    Collective,
    /// Two processes exchange messages; the master's own time is the result.
    PointToPoint,
    /// Non-blocking collective; measured for overlap with computation.
    NonBlocking,
}

impl OperationKind {
    /// Whether pipelined (unsynchronized) measurement is meaningful.
    pub fn supports_pipelined(self) -> bool {
        matches!(self, OperationKind::Collective)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Collective => "collective",
            OperationKind::PointToPoint => "point-to-point",
            OperationKind::NonBlocking => "non-blocking collective",
        })
    }
}

/// Parameters of one test, fixed for all its runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestParams {
    /// Elements (bytes) per message.
    pub count: usize,
    /// Processes in the tested group.
    pub nprocs: usize,
    /// Rotate buffers across cache-separated blocks.
    pub cache_defeat: bool,
    /// Rank that owns point-to-point timings and writes reports.
    pub master: usize,
}

impl TestParams {
    /// Parameters for `count` elements on `nprocs` processes.
    pub fn new(count: usize, nprocs: usize) -> Self {
        Self {
            count,
            nprocs,
            cache_defeat: false,
            master: 0,
        }
    }
}

/// Phase durations of a non-blocking run, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Phases {
    /// Time spent initiating the operation.
    pub init: f64,
    /// Time spent blocked waiting for completion.
    pub wait: f64,
    /// Time spent in simulated computation.
    pub comp: f64,
}

/// What an operation sees during one run.
pub struct RunContext<'a> {
    /// Group the operation runs on.
    pub comm: &'a dyn Communicator,
    /// Clock of this process.
    pub clock: &'a dyn Clock,
    /// Simulated computation to overlap with a non-blocking operation.
    pub compute: f64,
    /// Phase timings recorded by non-blocking operations.
    pub phases: Phases,
}

impl<'a> RunContext<'a> {
    /// Context with no simulated computation.
    pub fn new(comm: &'a dyn Communicator, clock: &'a dyn Clock) -> Self {
        Self {
            comm,
            clock,
            compute: 0.0,
            phases: Phases::default(),
        }
    }

    /// Run `init`, the simulated computation and the wait of a non-blocking
    /// operation, recording each phase.
    pub fn overlap<F>(&mut self, init: F) -> Result<Vec<Vec<u8>>, TransportError>
    where
        F: FnOnce(&dyn Communicator) -> Result<Request, TransportError>,
    {
        let t0 = self.clock.now();
        let mut request = init(self.comm)?;
        let t1 = self.clock.now();
        self.phases.init = t1 - t0;

        if self.compute > 0.0 {
            let slice = self.compute / f64::from(COMPUTE_POLL_SLICES);
            let deadline = t1 + self.compute;
            loop {
                let now = self.clock.now();
                if now >= deadline {
                    break;
                }
                self.clock.spin_until((now + slice).min(deadline));
                request.test(self.comm)?;
            }
        }
        let t2 = self.clock.now();
        self.phases.comp = t2 - t1;

        let received = request.wait(self.comm)?;
        self.phases.wait = self.clock.now() - t2;
        Ok(received)
    }
}

/// A timed payload.
pub trait Operation: Send {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Reduction and scheduling class.
    fn kind(&self) -> OperationKind;

    /// One-line description of what a run does.
    fn describe(&self) -> &'static str;

    /// Smallest group this operation can run on.
    fn min_procs(&self) -> usize {
        1
    }

    /// Prepare buffers for a test. Called on every rank of the tested group.
    fn init(&mut self, comm: &dyn Communicator, params: &TestParams) -> Result<(), BenchError>;

    /// Execute one run.
    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError>;

    /// Release test resources.
    fn teardown(&mut self) {}
}

/// Registry entry of a built-in operation.
pub struct OperationInfo {
    /// Name accepted by [`lookup`].
    pub name: &'static str,
    build: fn() -> Box<dyn Operation>,
}

impl OperationInfo {
    /// Fresh instance of the operation.
    pub fn build(&self) -> Box<dyn Operation> {
        (self.build)()
    }

    /// Reduction and scheduling class.
    pub fn kind(&self) -> OperationKind {
        self.build().kind()
    }

    /// One-line description.
    pub fn describe(&self) -> &'static str {
        self.build().describe()
    }
}

impl fmt::Debug for OperationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationInfo").field("name", &self.name).finish()
    }
}

macro_rules! entry {
    ($name:literal, $build:expr) => {
        OperationInfo {
            name: $name,
            build: || Box::new($build),
        }
    };
}

static REGISTRY: &[OperationInfo] = &[
    entry!("barrier", Barrier::default()),
    entry!("bcast", Bcast::default()),
    entry!("reduce", Reduce::default()),
    entry!("allreduce", Allreduce::default()),
    entry!("gather", Gather::default()),
    entry!("scatter", Scatter::default()),
    entry!("allgather", Allgather::default()),
    entry!("alltoall", Alltoall::default()),
    entry!("waitpattern-up", WaitPattern::new(WaitShape::Up)),
    entry!("waitpattern-down", WaitPattern::new(WaitShape::Down)),
    entry!("waitpattern-null", WaitPattern::new(WaitShape::Null)),
    entry!("send", SendOnly::default()),
    entry!("sendrecv", SendRecv::default()),
    entry!("ibcast", Ibcast::default()),
    entry!("ibarrier", Ibarrier::default()),
    entry!("fixed-cost", FixedCost::default()),
];

/// All built-in operations, in listing order.
pub fn catalog() -> &'static [OperationInfo] {
    REGISTRY
}

/// Instantiate a built-in operation by case-insensitive name.
pub fn lookup(name: &str) -> Result<Box<dyn Operation>, ConfigError> {
    REGISTRY
        .iter()
        .find(|info| info.name.eq_ignore_ascii_case(name))
        .map(OperationInfo::build)
        .ok_or_else(|| ConfigError::UnknownOperation { name: name.to_string() })
}

/// Send and receive pools of one operation instance.
#[derive(Debug)]
pub(crate) struct Buffers {
    pub(crate) send: MemPool,
    pub(crate) recv: MemPool,
}

impl Buffers {
    pub(crate) fn new(send: usize, recv: usize, cache_defeat: bool) -> Result<Self, AllocationError> {
        Ok(Self {
            send: MemPool::new(send, cache_defeat)?,
            recv: MemPool::new(recv, cache_defeat)?,
        })
    }
}

pub(crate) fn uninitialized(name: &str) -> TransportError {
    TransportError::Failed(format!("{name} ran before init"))
}

/// Copy a received payload into an operation buffer of the same size.
pub(crate) fn copy_into(dst: &mut [u8], src: &[u8]) -> Result<(), TransportError> {
    if dst.len() != src.len() {
        return Err(TransportError::Truncated {
            expected: dst.len(),
            got: src.len(),
        });
    }
    dst.copy_from_slice(src);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::transport::ThreadGroup;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let op = lookup("BCAST").unwrap();
        assert_eq!(op.name(), "bcast");
        assert_eq!(op.kind(), OperationKind::Collective);
    }

    #[test]
    fn test_unknown_operation() {
        let err = lookup("allscan").err().unwrap();
        assert_eq!(err, ConfigError::UnknownOperation { name: "allscan".into() });
    }

    #[test]
    fn test_catalog_matches_instances() {
        for info in catalog() {
            let op = info.build();
            assert_eq!(op.name(), info.name);
            assert!(!info.describe().is_empty(), "{}", info.name);
        }
    }

    #[test]
    fn test_every_operation_runs_on_four_ranks() {
        let group = ThreadGroup::new(4);
        for info in catalog() {
            let results = group
                .run(|comm| {
                    let clock = VirtualClock::new(0.0);
                    let mut op = info.build();
                    let params = TestParams::new(16, comm.size());
                    op.init(&comm, &params).unwrap();
                    for _ in 0..3 {
                        let mut ctx = RunContext::new(&comm, &clock);
                        op.run(&mut ctx)?;
                    }
                    op.teardown();
                    Ok::<_, TransportError>(())
                })
                .unwrap();
            for r in results {
                assert!(r.is_ok(), "{} failed: {:?}", info.name, r);
            }
        }
    }

    #[test]
    fn test_overlap_records_phases() {
        let group = ThreadGroup::new(2);
        let phases = group
            .run(|comm| {
                let clock = VirtualClock::new(0.0);
                let mut ctx = RunContext::new(&comm, &clock);
                ctx.compute = 1e-3;
                ctx.overlap(|c| {
                    if c.rank() == 0 {
                        c.send(1, crate::transport::TAG_USER, b"x")?;
                        Ok(Request::completed())
                    } else {
                        Ok(Request::recv(0, crate::transport::TAG_USER))
                    }
                })
                .unwrap();
                ctx.phases
            })
            .unwrap();
        for p in phases {
            assert!((p.comp - 1e-3).abs() < 1e-9, "comp = {}", p.comp);
            assert_eq!(p.init, 0.0);
        }
    }
}
