//! Clock offset estimation.
//!
//! Both algorithms are built on one request/reply primitive: the client
//! stamps a request with its local send time, the server answers with its
//! own clock, and the client keeps the answer of the exchange with the
//! smallest round-trip time, assuming the server read its clock halfway
//! through. The error of that estimate is bounded by half the best RTT.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use collbench_core::constants::{SYNC_MAX_ITERS, SYNC_STABLE_ITERS};

use crate::clock::Clock;
use crate::error::TransportError;
use crate::transport::{decode_f64s, Communicator, TAG_CLOCK_SYNC};

/// Timestamp a client sends to end an exchange.
const STOP_SENTINEL: f64 = f64::NEG_INFINITY;

/// Offset estimation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAlgorithm {
    /// Root exchanges with every peer in turn: O(n) rounds.
    #[default]
    Linear,
    /// Every process syncs with its ring predecessor in parallel, and
    /// per-hop offsets are summed around the ring: O(1) rounds.
    Ring,
}

/// Result of a clock synchronization on one process.
///
/// `local + offset ≈ root` for every time read from this process's clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncContext {
    offset: f64,
    root: usize,
    algorithm: SyncAlgorithm,
    rtt_min: f64,
}

impl SyncContext {
    /// Context of a process whose clock is taken as-is.
    pub fn unsynchronized(root: usize) -> Self {
        Self {
            offset: 0.0,
            root,
            algorithm: SyncAlgorithm::Linear,
            rtt_min: 0.0,
        }
    }

    /// Estimate every process's offset relative to `root`.
    ///
    /// Collective: every rank of `comm` must call it with the same arguments.
    pub fn synchronize(
        comm: &dyn Communicator,
        clock: &dyn Clock,
        root: usize,
        algorithm: SyncAlgorithm,
    ) -> Result<Self, TransportError> {
        if root >= comm.size() {
            return Err(TransportError::InvalidRank {
                rank: root,
                size: comm.size(),
            });
        }
        let (offset, rtt_min) = if comm.size() < 2 {
            (0.0, 0.0)
        } else {
            match algorithm {
                SyncAlgorithm::Linear => sync_linear(comm, clock, root)?,
                SyncAlgorithm::Ring => sync_ring(comm, clock, root)?,
            }
        };
        Ok(Self {
            offset,
            root,
            algorithm,
            rtt_min,
        })
    }

    /// Additive correction from local to root time.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Reference process.
    pub fn root(&self) -> usize {
        self.root
    }

    /// Algorithm that produced the offset.
    pub fn algorithm(&self) -> SyncAlgorithm {
        self.algorithm
    }

    /// Best round-trip time this process observed as a client (0 if it never was one).
    ///
    /// For a direct exchange with the root, the offset error is at most half of it.
    pub fn rtt_min(&self) -> f64 {
        self.rtt_min
    }

    /// Translate a local instant to root time.
    pub fn to_root(&self, local: f64) -> f64 {
        local + self.offset
    }

    /// Translate a root instant to local time.
    pub fn to_local(&self, root_time: f64) -> f64 {
        root_time - self.offset
    }
}

fn sync_linear(
    comm: &dyn Communicator,
    clock: &dyn Clock,
    root: usize,
) -> Result<(f64, f64), TransportError> {
    let rank = comm.rank();
    let mut result = (0.0, 0.0);
    for peer in (0..comm.size()).filter(|&p| p != root) {
        comm.barrier()?;
        if rank == root {
            serve_offset(comm, clock, peer)?;
        } else if rank == peer {
            result = measure_offset(comm, clock, root)?;
        }
    }
    Ok(result)
}

fn sync_ring(
    comm: &dyn Communicator,
    clock: &dyn Clock,
    root: usize,
) -> Result<(f64, f64), TransportError> {
    let (rank, size) = (comm.rank(), comm.size());
    let prev = (rank + size - 1) % size;
    let next = (rank + 1) % size;

    comm.barrier()?;

    // Alternate roles so that neighbours are never both waiting as servers
    let (hop_offset, rtt_min) = if rank % 2 == 0 {
        serve_offset(comm, clock, next)?;
        measure_offset(comm, clock, prev)?
    } else {
        let hop = measure_offset(comm, clock, prev)?;
        serve_offset(comm, clock, next)?;
        hop
    };

    let offsets = match comm.gather_f64(root, hop_offset)? {
        Some(mut offsets) => {
            accumulate_ring_offsets(&mut offsets, root);
            offsets
        }
        None => Vec::new(),
    };
    let offset = comm.scatter_f64(root, &offsets)?;
    Ok((offset, rtt_min))
}

/// Turn per-hop offsets (each relative to its ring predecessor) into
/// offsets relative to `root`.
fn accumulate_ring_offsets(offsets: &mut [f64], root: usize) {
    let size = offsets.len();
    offsets[root] = 0.0;
    let mut sum = 0.0;
    let mut i = (root + 1) % size;
    while i != root {
        offsets[i] += sum;
        sum = offsets[i];
        i = (i + 1) % size;
    }
}

/// Client side: returns `(offset, rtt_min)` of the local clock relative to `server`.
fn measure_offset(
    comm: &dyn Communicator,
    clock: &dyn Clock,
    server: usize,
) -> Result<(f64, f64), TransportError> {
    let mut rtt_min = f64::INFINITY;
    let mut offset = 0.0;
    let mut stale = 0;
    let mut iterations = 0;

    loop {
        let start = clock.now();
        comm.send(server, TAG_CLOCK_SYNC, &start.to_le_bytes())?;
        let server_time = decode_f64s(&comm.recv(server, TAG_CLOCK_SYNC)?, 1)?[0];
        let rtt = clock.now() - start;
        iterations += 1;

        if rtt < rtt_min {
            rtt_min = rtt;
            stale = 0;
            offset = server_time - rtt / 2.0 - start;
        } else {
            stale += 1;
        }

        if stale >= SYNC_STABLE_ITERS || iterations >= SYNC_MAX_ITERS {
            comm.send(server, TAG_CLOCK_SYNC, &STOP_SENTINEL.to_le_bytes())?;
            break;
        }
    }

    trace!(server, iterations, rtt_min, offset, "offset exchange finished");
    if iterations >= SYNC_MAX_ITERS {
        debug!(server, rtt_min, "clock sync hit the iteration cap before RTT stabilized");
    }
    Ok((offset, rtt_min))
}

/// Server side: answer requests from `client` until it sends the stop sentinel.
fn serve_offset(
    comm: &dyn Communicator,
    clock: &dyn Clock,
    client: usize,
) -> Result<(), TransportError> {
    loop {
        let client_time = decode_f64s(&comm.recv(client, TAG_CLOCK_SYNC)?, 1)?[0];
        let now = clock.now();
        if client_time == STOP_SENTINEL {
            return Ok(());
        }
        comm.send(client, TAG_CLOCK_SYNC, &now.to_le_bytes())?;
    }
}
