//! Point-to-point exchanges between the master and its neighbour.
//!
//! Only two ranks take part; the rest of the group idles through the run.
//! The engine reports the master's own time for these operations.

use super::{copy_into, uninitialized, Buffers, Operation, OperationKind, RunContext, TestParams};
use crate::error::{BenchError, TransportError};
use crate::transport::{Communicator, TAG_USER};

const TAG_PING: u32 = TAG_USER + 16;
const TAG_PONG: u32 = TAG_USER + 17;

#[derive(Debug, Default)]
struct Pair {
    bufs: Option<Buffers>,
    master: usize,
    peer: usize,
}

impl Pair {
    fn init(&mut self, comm: &dyn Communicator, params: &TestParams) -> Result<(), BenchError> {
        self.bufs = Some(Buffers::new(params.count, params.count, params.cache_defeat)?);
        self.master = params.master;
        self.peer = (params.master + 1) % comm.size();
        Ok(())
    }
}

/// `send`: the master sends `count` bytes, its neighbour receives them.
#[derive(Debug, Default)]
pub struct SendOnly {
    pair: Pair,
}

impl Operation for SendOnly {
    fn name(&self) -> &'static str {
        "send"
    }

    fn kind(&self) -> OperationKind {
        OperationKind::PointToPoint
    }

    fn describe(&self) -> &'static str {
        "master sends count bytes to its neighbour"
    }

    fn min_procs(&self) -> usize {
        2
    }

    fn init(&mut self, comm: &dyn Communicator, params: &TestParams) -> Result<(), BenchError> {
        self.pair.init(comm, params)
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError> {
        let Pair { bufs, master, peer } = &mut self.pair;
        let bufs = bufs.as_mut().ok_or_else(|| uninitialized("send"))?;
        let rank = ctx.comm.rank();
        if rank == *master {
            ctx.comm.send(*peer, TAG_PING, bufs.send.alloc())
        } else if rank == *peer {
            copy_into(bufs.recv.alloc(), &ctx.comm.recv(*master, TAG_PING)?)
        } else {
            Ok(())
        }
    }

    fn teardown(&mut self) {
        self.pair.bufs = None;
    }
}

/// `sendrecv`: the master and its neighbour swap `count` bytes.
#[derive(Debug, Default)]
pub struct SendRecv {
    pair: Pair,
}

impl Operation for SendRecv {
    fn name(&self) -> &'static str {
        "sendrecv"
    }

    fn kind(&self) -> OperationKind {
        OperationKind::PointToPoint
    }

    fn describe(&self) -> &'static str {
        "master and its neighbour exchange count bytes"
    }

    fn min_procs(&self) -> usize {
        2
    }

    fn init(&mut self, comm: &dyn Communicator, params: &TestParams) -> Result<(), BenchError> {
        self.pair.init(comm, params)
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError> {
        let Pair { bufs, master, peer } = &mut self.pair;
        let bufs = bufs.as_mut().ok_or_else(|| uninitialized("sendrecv"))?;
        let rank = ctx.comm.rank();
        let (to, send_tag, recv_tag) = if rank == *master {
            (*peer, TAG_PING, TAG_PONG)
        } else if rank == *peer {
            (*master, TAG_PONG, TAG_PING)
        } else {
            return Ok(());
        };
        ctx.comm.send(to, send_tag, bufs.send.alloc())?;
        copy_into(bufs.recv.alloc(), &ctx.comm.recv(to, recv_tag)?)
    }

    fn teardown(&mut self) {
        self.pair.bufs = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::transport::ThreadGroup;

    #[test]
    fn test_neighbour_wraps_around() {
        let peers = ThreadGroup::new(3)
            .run(|comm| {
                let mut op = SendRecv::default();
                let mut params = TestParams::new(8, 3);
                params.master = 2;
                op.init(&comm, &params).unwrap();
                let clock = VirtualClock::new(0.0);
                op.run(&mut RunContext::new(&comm, &clock)).unwrap();
                op.pair.peer
            })
            .unwrap();
        assert_eq!(peers, vec![0, 0, 0]);
    }

    #[test]
    fn test_idle_ranks_do_nothing() {
        ThreadGroup::new(4)
            .run(|comm| {
                let mut op = SendOnly::default();
                op.init(&comm, &TestParams::new(4, 4)).unwrap();
                let clock = VirtualClock::new(0.0);
                for _ in 0..5 {
                    op.run(&mut RunContext::new(&comm, &clock)).unwrap();
                }
            })
            .unwrap();
    }
}
