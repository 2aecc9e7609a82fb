//! Message-passing abstraction for a closed, cooperating process group.
//!
//! The engine only needs tagged point-to-point messages; every collective it
//! uses (barrier, broadcast, MAX reductions, gathers) is provided on top of
//! [`Communicator::send`]/[`Communicator::recv`] with simple root-based
//! algorithms. [`local::ThreadGroup`] runs one process per thread.
//!
//! # Run epochs
//!
//! Each measured run executes in its own epoch ([`Communicator::begin_epoch`]).
//! Messages only match receives posted in the same epoch, so a process that
//! skips a run (it started late) can never hand a stale payload to the next
//! run. A process that abandons an epoch calls [`Communicator::abort_epoch`];
//! peers blocked in that epoch then fail with [`TransportError::Aborted`]
//! instead of waiting forever.

pub mod local;

use crate::error::TransportError;

pub use local::{LocalComm, ThreadGroup};

pub(crate) const TAG_BARRIER: u32 = 1;
pub(crate) const TAG_BCAST: u32 = 2;
pub(crate) const TAG_REDUCE: u32 = 3;
pub(crate) const TAG_GATHER: u32 = 4;
pub(crate) const TAG_SCATTER: u32 = 5;
pub(crate) const TAG_ALLGATHER: u32 = 6;
pub(crate) const TAG_ALLTOALL: u32 = 7;
pub(crate) const TAG_CLOCK_SYNC: u32 = 128;

/// First tag available to operations under test.
pub const TAG_USER: u32 = 1024;

/// A process's view of its group.
///
/// Ranks are `0..size()`. `send` never blocks; `recv` blocks until a
/// message with the given source and tag arrives in the current epoch.
pub trait Communicator: Send {
    /// Rank of this process.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Send `data` to `dest` with `tag`.
    fn send(&self, dest: usize, tag: u32, data: &[u8]) -> Result<(), TransportError>;

    /// Receive the next message from `src` with `tag`.
    fn recv(&self, src: usize, tag: u32) -> Result<Vec<u8>, TransportError>;

    /// Whether a message from `src` with `tag` is ready, without blocking.
    fn probe(&self, src: usize, tag: u32) -> Result<bool, TransportError>;

    /// Sub-group of the first `size` ranks.
    ///
    /// Must be called by every rank of this group in the same order.
    /// Ranks outside the sub-group get `None`.
    fn split(&self, size: usize) -> Result<Option<Box<dyn Communicator>>, TransportError>;

    /// Enter a fresh run epoch and return its id.
    fn begin_epoch(&self) -> u64;

    /// Return to the control epoch.
    fn end_epoch(&self);

    /// Abandon the current epoch, releasing peers blocked in it.
    fn abort_epoch(&self) -> Result<(), TransportError>;

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<(), TransportError> {
        let size = self.size();
        if size < 2 {
            return Ok(());
        }
        if self.rank() == 0 {
            for src in 1..size {
                self.recv(src, TAG_BARRIER)?;
            }
            for dest in 1..size {
                self.send(dest, TAG_BARRIER, &[])?;
            }
        } else {
            self.send(0, TAG_BARRIER, &[])?;
            self.recv(0, TAG_BARRIER)?;
        }
        Ok(())
    }

    /// Replace `buf` on every rank with the root's contents.
    fn broadcast(&self, root: usize, buf: &mut Vec<u8>) -> Result<(), TransportError> {
        check_rank(root, self.size())?;
        if self.rank() == root {
            for dest in (0..self.size()).filter(|&r| r != root) {
                self.send(dest, TAG_BCAST, buf)?;
            }
        } else {
            *buf = self.recv(root, TAG_BCAST)?;
        }
        Ok(())
    }

    /// Broadcast a slice of doubles from `root`.
    fn broadcast_f64(&self, root: usize, values: &mut [f64]) -> Result<(), TransportError> {
        let mut buf = encode_f64s(values);
        self.broadcast(root, &mut buf)?;
        values.copy_from_slice(&decode_f64s(&buf, values.len())?);
        Ok(())
    }

    /// Element-wise MAX of `values` across the group, result on `root` only.
    fn reduce_max_f64(&self, root: usize, values: &mut [f64]) -> Result<(), TransportError> {
        check_rank(root, self.size())?;
        if self.rank() == root {
            for src in (0..self.size()).filter(|&r| r != root) {
                let peer = decode_f64s(&self.recv(src, TAG_REDUCE)?, values.len())?;
                for (v, p) in values.iter_mut().zip(peer) {
                    *v = v.max(p);
                }
            }
        } else {
            self.send(root, TAG_REDUCE, &encode_f64s(values))?;
        }
        Ok(())
    }

    /// Element-wise MAX of `values` across the group, result everywhere.
    fn allreduce_max_f64(&self, values: &mut [f64]) -> Result<(), TransportError> {
        self.reduce_max_f64(0, values)?;
        self.broadcast_f64(0, values)
    }

    /// Collect one slice per rank on `root`, in rank order.
    fn gather_bytes(&self, root: usize, data: &[u8]) -> Result<Option<Vec<Vec<u8>>>, TransportError> {
        check_rank(root, self.size())?;
        if self.rank() != root {
            self.send(root, TAG_GATHER, data)?;
            return Ok(None);
        }
        let mut all = Vec::with_capacity(self.size());
        for src in 0..self.size() {
            if src == root {
                all.push(data.to_vec());
            } else {
                all.push(self.recv(src, TAG_GATHER)?);
            }
        }
        Ok(Some(all))
    }

    /// Collect one `f64` per rank on `root`, in rank order.
    fn gather_f64(&self, root: usize, value: f64) -> Result<Option<Vec<f64>>, TransportError> {
        let Some(parts) = self.gather_bytes(root, &value.to_le_bytes())? else {
            return Ok(None);
        };
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            out.extend(decode_f64s(&part, 1)?);
        }
        Ok(Some(out))
    }

    /// Hand block `i` of the root's `blocks` to rank `i`.
    ///
    /// `blocks` is only read on the root and must hold one entry per rank.
    fn scatter_bytes(&self, root: usize, blocks: &[Vec<u8>]) -> Result<Vec<u8>, TransportError> {
        check_rank(root, self.size())?;
        if self.rank() != root {
            return self.recv(root, TAG_SCATTER);
        }
        if blocks.len() != self.size() {
            return Err(TransportError::Truncated {
                expected: self.size(),
                got: blocks.len(),
            });
        }
        for (dest, block) in blocks.iter().enumerate().filter(|&(r, _)| r != root) {
            self.send(dest, TAG_SCATTER, block)?;
        }
        Ok(blocks[root].clone())
    }

    /// Hand `values[i]` on the root to rank `i`.
    fn scatter_f64(&self, root: usize, values: &[f64]) -> Result<f64, TransportError> {
        let blocks: Vec<Vec<u8>> = values.iter().map(|v| v.to_le_bytes().to_vec()).collect();
        let mine = self.scatter_bytes(root, &blocks)?;
        Ok(decode_f64s(&mine, 1)?[0])
    }

    /// Every rank receives every rank's `data`, in rank order.
    fn allgather_bytes(&self, data: &[u8]) -> Result<Vec<Vec<u8>>, TransportError> {
        let (rank, size) = (self.rank(), self.size());
        for dest in (0..size).filter(|&r| r != rank) {
            self.send(dest, TAG_ALLGATHER, data)?;
        }
        (0..size)
            .map(|src| {
                if src == rank {
                    Ok(data.to_vec())
                } else {
                    self.recv(src, TAG_ALLGATHER)
                }
            })
            .collect()
    }

    /// Personalized exchange: `blocks[i]` goes to rank `i`; result `[j]` came from rank `j`.
    fn alltoall_bytes(&self, blocks: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, TransportError> {
        let (rank, size) = (self.rank(), self.size());
        if blocks.len() != size {
            return Err(TransportError::Truncated {
                expected: size,
                got: blocks.len(),
            });
        }
        for dest in (0..size).filter(|&r| r != rank) {
            self.send(dest, TAG_ALLTOALL, &blocks[dest])?;
        }
        (0..size)
            .map(|src| {
                if src == rank {
                    Ok(blocks[rank].clone())
                } else {
                    self.recv(src, TAG_ALLTOALL)
                }
            })
            .collect()
    }
}

/// A pending non-blocking exchange.
///
/// Holds the receives still outstanding and the sends to issue once they
/// complete. Progress is made only in [`test`](Request::test) and
/// [`wait`](Request::wait).
#[derive(Debug, Default)]
pub struct Request {
    pending: Vec<(usize, u32)>,
    then_send: Vec<(usize, u32, Vec<u8>)>,
}

impl Request {
    /// A request with nothing left to do.
    pub fn completed() -> Self {
        Self::default()
    }

    /// Complete once a message from `src` with `tag` arrives.
    pub fn recv(src: usize, tag: u32) -> Self {
        Self::recv_all([src], tag)
    }

    /// Complete once a message from every source arrives.
    pub fn recv_all(srcs: impl IntoIterator<Item = usize>, tag: u32) -> Self {
        Self {
            pending: srcs.into_iter().map(|s| (s, tag)).collect(),
            ..Self::default()
        }
    }

    /// Issue a send after all receives complete.
    pub fn then_send(mut self, dest: usize, tag: u32, payload: Vec<u8>) -> Self {
        self.then_send.push((dest, tag, payload));
        self
    }

    /// Whether every outstanding receive could complete without blocking.
    pub fn test(&mut self, comm: &dyn Communicator) -> Result<bool, TransportError> {
        for &(src, tag) in &self.pending {
            if !comm.probe(src, tag)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Block until complete, returning the received payloads in order.
    pub fn wait(self, comm: &dyn Communicator) -> Result<Vec<Vec<u8>>, TransportError> {
        let mut received = Vec::with_capacity(self.pending.len());
        for (src, tag) in self.pending {
            received.push(comm.recv(src, tag)?);
        }
        for (dest, tag, payload) in self.then_send {
            comm.send(dest, tag, &payload)?;
        }
        Ok(received)
    }
}

/// Little-endian encoding of a slice of doubles.
pub fn encode_f64s(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode exactly `expected` doubles.
pub fn decode_f64s(bytes: &[u8], expected: usize) -> Result<Vec<f64>, TransportError> {
    if bytes.len() != expected * 8 {
        return Err(TransportError::Truncated {
            expected: expected * 8,
            got: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(c);
            f64::from_le_bytes(raw)
        })
        .collect())
}

fn check_rank(rank: usize, size: usize) -> Result<(), TransportError> {
    if rank < size {
        Ok(())
    } else {
        Err(TransportError::InvalidRank { rank, size })
    }
}
