//! Blocking collectives over byte buffers.

use super::{copy_into, uninitialized, Buffers, Operation, OperationKind, RunContext, TestParams};
use crate::error::{BenchError, TransportError};
use crate::transport::{Communicator, TAG_USER};

const TAG_BCAST_DATA: u32 = TAG_USER;
const TAG_REDUCE_RESULT: u32 = TAG_USER + 1;

/// Cut `buf` into `n` consecutive blocks of `count` bytes.
fn split_blocks(buf: &[u8], count: usize, n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| buf[i * count..(i + 1) * count].to_vec()).collect()
}

/// Concatenate per-rank blocks into `dst`.
fn join_blocks(dst: &mut [u8], blocks: &[Vec<u8>]) -> Result<(), TransportError> {
    let mut at = 0;
    for block in blocks {
        let end = at + block.len();
        if end > dst.len() {
            return Err(TransportError::Truncated {
                expected: dst.len(),
                got: end,
            });
        }
        dst[at..end].copy_from_slice(block);
        at = end;
    }
    Ok(())
}

fn fan_out(comm: &dyn Communicator, root: usize, tag: u32, buf: &mut [u8]) -> Result<(), TransportError> {
    if comm.rank() == root {
        for dest in (0..comm.size()).filter(|&r| r != root) {
            comm.send(dest, tag, buf)?;
        }
        Ok(())
    } else {
        copy_into(buf, &comm.recv(root, tag)?)
    }
}

/// Byte-wise MAX of every rank's `send` into `recv` on `root`.
fn reduce_max_bytes(
    comm: &dyn Communicator,
    root: usize,
    send: &[u8],
    recv: &mut [u8],
) -> Result<(), TransportError> {
    let Some(parts) = comm.gather_bytes(root, send)? else {
        return Ok(());
    };
    recv.copy_from_slice(send);
    for part in parts {
        if part.len() != recv.len() {
            return Err(TransportError::Truncated {
                expected: recv.len(),
                got: part.len(),
            });
        }
        for (r, p) in recv.iter_mut().zip(part) {
            *r = (*r).max(p);
        }
    }
    Ok(())
}

macro_rules! collective {
    ($ty:ident, $name:literal, $desc:literal) => {
        #[doc = concat!("`", $name, "`: ", $desc, ".")]
        #[derive(Debug, Default)]
        pub struct $ty {
            bufs: Option<Buffers>,
            count: usize,
            root: usize,
        }

        impl $ty {
            fn parts(&mut self) -> Result<(&mut Buffers, usize, usize), TransportError> {
                let (count, root) = (self.count, self.root);
                let bufs = self.bufs.as_mut().ok_or_else(|| uninitialized($name))?;
                Ok((bufs, count, root))
            }
        }
    };
}

macro_rules! describe {
    ($name:literal, $desc:literal) => {
        fn name(&self) -> &'static str {
            $name
        }

        fn kind(&self) -> OperationKind {
            OperationKind::Collective
        }

        fn describe(&self) -> &'static str {
            $desc
        }

        fn teardown(&mut self) {
            self.bufs = None;
        }
    };
}

collective!(Bcast, "bcast", "root sends count bytes to every rank");
collective!(Reduce, "reduce", "byte-wise MAX of count bytes onto root");
collective!(Allreduce, "allreduce", "byte-wise MAX of count bytes on every rank");
collective!(Gather, "gather", "root collects count bytes from every rank");
collective!(Scatter, "scatter", "root hands count distinct bytes to every rank");
collective!(Allgather, "allgather", "every rank collects count bytes from every rank");
collective!(Alltoall, "alltoall", "every rank sends count distinct bytes to every rank");

/// `barrier`: all ranks synchronize.
#[derive(Debug, Default)]
pub struct Barrier;

impl Operation for Barrier {
    fn name(&self) -> &'static str {
        "barrier"
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Collective
    }

    fn describe(&self) -> &'static str {
        "all ranks synchronize"
    }

    fn init(&mut self, _comm: &dyn Communicator, _params: &TestParams) -> Result<(), BenchError> {
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError> {
        ctx.comm.barrier()
    }
}

impl Operation for Bcast {
    describe!("bcast", "root sends count bytes to every rank");

    fn init(&mut self, _comm: &dyn Communicator, params: &TestParams) -> Result<(), BenchError> {
        self.bufs = Some(Buffers::new(params.count, 0, params.cache_defeat)?);
        self.count = params.count;
        self.root = params.master;
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError> {
        let (bufs, _, root) = self.parts()?;
        fan_out(ctx.comm, root, TAG_BCAST_DATA, bufs.send.alloc())
    }
}

impl Operation for Reduce {
    describe!("reduce", "byte-wise MAX of count bytes onto root");

    fn init(&mut self, _comm: &dyn Communicator, params: &TestParams) -> Result<(), BenchError> {
        self.bufs = Some(Buffers::new(params.count, params.count, params.cache_defeat)?);
        self.count = params.count;
        self.root = params.master;
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError> {
        let (bufs, _, root) = self.parts()?;
        reduce_max_bytes(ctx.comm, root, bufs.send.alloc(), bufs.recv.alloc())
    }
}

impl Operation for Allreduce {
    describe!("allreduce", "byte-wise MAX of count bytes on every rank");

    fn init(&mut self, _comm: &dyn Communicator, params: &TestParams) -> Result<(), BenchError> {
        self.bufs = Some(Buffers::new(params.count, params.count, params.cache_defeat)?);
        self.count = params.count;
        self.root = params.master;
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError> {
        let (bufs, _, root) = self.parts()?;
        let recv = bufs.recv.alloc();
        reduce_max_bytes(ctx.comm, root, bufs.send.alloc(), recv)?;
        fan_out(ctx.comm, root, TAG_REDUCE_RESULT, recv)
    }
}

impl Operation for Gather {
    describe!("gather", "root collects count bytes from every rank");

    fn init(&mut self, _comm: &dyn Communicator, params: &TestParams) -> Result<(), BenchError> {
        let total = params.count * params.nprocs;
        self.bufs = Some(Buffers::new(params.count, total, params.cache_defeat)?);
        self.count = params.count;
        self.root = params.master;
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError> {
        let (bufs, _, root) = self.parts()?;
        if let Some(parts) = ctx.comm.gather_bytes(root, bufs.send.alloc())? {
            join_blocks(bufs.recv.alloc(), &parts)?;
        }
        Ok(())
    }
}

impl Operation for Scatter {
    describe!("scatter", "root hands count distinct bytes to every rank");

    fn init(&mut self, _comm: &dyn Communicator, params: &TestParams) -> Result<(), BenchError> {
        let total = params.count * params.nprocs;
        self.bufs = Some(Buffers::new(total, params.count, params.cache_defeat)?);
        self.count = params.count;
        self.root = params.master;
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError> {
        let (bufs, count, root) = self.parts()?;
        let blocks = if ctx.comm.rank() == root {
            split_blocks(bufs.send.alloc(), count, ctx.comm.size())
        } else {
            Vec::new()
        };
        let mine = ctx.comm.scatter_bytes(root, &blocks)?;
        copy_into(bufs.recv.alloc(), &mine)
    }
}

impl Operation for Allgather {
    describe!("allgather", "every rank collects count bytes from every rank");

    fn init(&mut self, _comm: &dyn Communicator, params: &TestParams) -> Result<(), BenchError> {
        let total = params.count * params.nprocs;
        self.bufs = Some(Buffers::new(params.count, total, params.cache_defeat)?);
        self.count = params.count;
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError> {
        let (bufs, _, _) = self.parts()?;
        let all = ctx.comm.allgather_bytes(bufs.send.alloc())?;
        join_blocks(bufs.recv.alloc(), &all)
    }
}

impl Operation for Alltoall {
    describe!("alltoall", "every rank sends count distinct bytes to every rank");

    fn init(&mut self, _comm: &dyn Communicator, params: &TestParams) -> Result<(), BenchError> {
        let total = params.count * params.nprocs;
        self.bufs = Some(Buffers::new(total, total, params.cache_defeat)?);
        self.count = params.count;
        Ok(())
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), TransportError> {
        let (bufs, count, _) = self.parts()?;
        let blocks = split_blocks(bufs.send.alloc(), count, ctx.comm.size());
        let received = ctx.comm.alltoall_bytes(&blocks)?;
        join_blocks(bufs.recv.alloc(), &received)
    }
}
