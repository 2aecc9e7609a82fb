//! Operation buffers with optional cache defeat.
//!
//! With cache defeat enabled the pool holds [`MEMPOOL_BLOCKS`] blocks laid out
//! as `block | cache line | block | cache line | ...` and hands them out in
//! rotation, so consecutive runs touch memory that is not already hot in the
//! cache. Without it every allocation returns the same buffer.

use collbench_core::constants::{CACHE_LINE_SIZE, MEMPOOL_ALIGN, MEMPOOL_BLOCKS};
use tracing::debug;

use crate::error::AllocationError;

const FILL_BYTE: u8 = 0x77;

/// Rotating buffer pool. One per process and test.
#[derive(Debug)]
pub struct MemPool {
    storage: Vec<u8>,
    /// Offset of the first aligned byte in `storage`.
    base: usize,
    block_size: usize,
    stride: usize,
    next: usize,
    cache_defeat: bool,
}

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

impl MemPool {
    /// Reserve room for blocks of `block_size` bytes.
    pub fn new(block_size: usize, cache_defeat: bool) -> Result<Self, AllocationError> {
        let stride = align_up(block_size + CACHE_LINE_SIZE, MEMPOOL_ALIGN);
        let requested = if cache_defeat {
            stride
                .checked_mul(MEMPOOL_BLOCKS)
                .and_then(|n| n.checked_add(MEMPOOL_ALIGN))
                .ok_or(AllocationError::Exhausted { requested: usize::MAX })?
        } else {
            block_size + MEMPOOL_ALIGN
        };

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(requested)
            .map_err(|_| AllocationError::Exhausted { requested })?;
        storage.resize(requested, FILL_BYTE);

        let base = match storage.as_ptr().align_offset(MEMPOOL_ALIGN) {
            off if off < MEMPOOL_ALIGN => off,
            _ => 0,
        };
        debug!(bytes = requested, cache_defeat, "memory pool created");

        Ok(Self {
            storage,
            base,
            block_size,
            stride,
            next: 0,
            cache_defeat,
        })
    }

    /// Bytes available in every block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total bytes held by the pool.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Whether allocations rotate across blocks.
    pub fn cache_defeat(&self) -> bool {
        self.cache_defeat
    }

    /// Next buffer of [`block_size`](Self::block_size) bytes.
    pub fn alloc(&mut self) -> &mut [u8] {
        let start = if self.cache_defeat {
            let block = self.next;
            self.next = (self.next + 1) % MEMPOOL_BLOCKS;
            self.base + block * self.stride
        } else {
            self.base
        };
        &mut self.storage[start..start + self.block_size]
    }
}
