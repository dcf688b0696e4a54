//! Heap-backed block cache.
//!
//! `MemoryCache` keeps the whole volume in one contiguous `Vec<u8>`. It is
//! the cache of choice for unit tests and for throwaway indexes that never
//! need to survive the process.

use eyre::{ensure, Result};

use super::{BlockCache, BlockId};

#[derive(Debug)]
pub struct MemoryCache {
    block_size: usize,
    num_blocks: u64,
    data: Vec<u8>,
    allocations: u64,
    deallocations: u64,
}

impl MemoryCache {
    pub fn new(block_size: usize, num_blocks: u64) -> Self {
        Self {
            block_size,
            num_blocks,
            data: vec![0u8; block_size * num_blocks as usize],
            allocations: 0,
            deallocations: 0,
        }
    }

    /// Count of allocation notifications received. Test hook.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Count of deallocation notifications received. Test hook.
    pub fn deallocations(&self) -> u64 {
        self.deallocations
    }

    fn block_range(&self, block: BlockId) -> Result<std::ops::Range<usize>> {
        ensure!(
            block < self.num_blocks,
            "block {} out of bounds (num_blocks={})",
            block,
            self.num_blocks
        );
        let start = block as usize * self.block_size;
        Ok(start..start + self.block_size)
    }
}

impl BlockCache for MemoryCache {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    fn read(&mut self, block: BlockId, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() == self.block_size,
            "read buffer size {} != block size {}",
            buf.len(),
            self.block_size
        );
        let range = self.block_range(block)?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write(&mut self, block: BlockId, buf: &[u8]) -> Result<()> {
        ensure!(
            buf.len() == self.block_size,
            "write buffer size {} != block size {}",
            buf.len(),
            self.block_size
        );
        let range = self.block_range(block)?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }

    fn notify_allocate_block(&mut self, _block: BlockId) {
        self.allocations += 1;
    }

    fn notify_deallocate_block(&mut self, _block: BlockId) {
        self.deallocations += 1;
    }
}
