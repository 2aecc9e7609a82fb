//! Non-blocking collectives.
//!
//! Each run initiates the exchange, optionally overlaps it with simulated
//! computation through [`RunContext::overlap`], then waits for completion.

use super::{copy_into, uninitialized, Buffers, Operation, OperationKind, RunContext, TestParams};
use crate::error::{BenchError, TransportError};
use crate::transport::{Communicator, Request, TAG_USER};

const TAG_IBCAST: u32 = TAG_USER + 32;
const TAG_IBARRIER_IN: u32 = TAG_USER + 33;
const TAG_IBARRIER_OUT: u32 = TAG_USER + 34;

/// `ibcast`: non-blocking broadcast of `count` bytes from the master.
#[derive(Debug, Default)]
pub struct Ibcast {
    bufs: Option<Buffers>,
    root: usize,
}

impl Operation for Ibcast {
    fn name(&self) -> &'static str {
        "ibcast"
    }

    fn kind(&self) -> OperationKind {
        OperationKind::NonBlocking
    }

    fn describe(&self) -> &'static str {
        "non-blocking broadcast of count bytes"
    }

    fn init(&mut self, _comm: &dyn Communicator, params: &TestParams) -> Result<(), BenchError> {
        self.bufs = Some(Buffers::new(params.count, 0, params.cache_defeat)?);
        self.root = params.master;
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError> {
        let root = self.root;
        let buf = self.bufs.as_mut().ok_or_else(|| uninitialized("ibcast"))?.send.alloc();
        let received = ctx.overlap(|comm| {
            if comm.rank() == root {
                for dest in (0..comm.size()).filter(|&r| r != root) {
                    comm.send(dest, TAG_IBCAST, buf)?;
                }
                Ok(Request::completed())
            } else {
                Ok(Request::recv(root, TAG_IBCAST))
            }
        })?;
        match received.first() {
            Some(data) => copy_into(buf, data),
            None => Ok(()),
        }
    }

    fn teardown(&mut self) {
        self.bufs = None;
    }
}

/// `ibarrier`: non-blocking barrier through rank 0.
#[derive(Debug, Default)]
pub struct Ibarrier;

impl Operation for Ibarrier {
    fn name(&self) -> &'static str {
        "ibarrier"
    }

    fn kind(&self) -> OperationKind {
        OperationKind::NonBlocking
    }

    fn describe(&self) -> &'static str {
        "non-blocking barrier"
    }

    fn init(&mut self, _comm: &dyn Communicator, _params: &TestParams) -> Result<(), BenchError> {
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError> {
        ctx.overlap(|comm| {
            let size = comm.size();
            if comm.rank() == 0 {
                Ok((1..size).fold(Request::recv_all(1..size, TAG_IBARRIER_IN), |req, dest| {
                    req.then_send(dest, TAG_IBARRIER_OUT, Vec::new())
                }))
            } else {
                comm.send(0, TAG_IBARRIER_IN, &[])?;
                Ok(Request::recv(0, TAG_IBARRIER_OUT))
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::transport::ThreadGroup;

    #[test]
    fn test_ibcast_delivers_root_buffer() {
        ThreadGroup::new(3)
            .run(|comm| {
                let clock = VirtualClock::new(0.0);
                let mut op = Ibcast::default();
                op.init(&comm, &TestParams::new(32, 3)).unwrap();
                let mut ctx = RunContext::new(&comm, &clock);
                ctx.compute = 2e-4;
                op.run(&mut ctx).unwrap();
                assert!(ctx.phases.comp >= 2e-4);
            })
            .unwrap();
    }

    #[test]
    fn test_ibarrier_repeats() {
        ThreadGroup::new(4)
            .run(|comm| {
                let clock = VirtualClock::new(0.0);
                let mut op = Ibarrier;
                for _ in 0..10 {
                    op.run(&mut RunContext::new(&comm, &clock)).unwrap();
                }
            })
            .unwrap();
    }
}
