//! # Block Cache Contract
//!
//! The tree engine never performs raw file I/O. Every byte it persists goes
//! through a [`BlockCache`]: an addressable array of `num_blocks` blocks of
//! exactly `block_size` bytes each. The cache decides where those bytes
//! live - a heap buffer, a memory-mapped file, a buffer pool in front of a
//! raw device - and the engine is oblivious.
//!
//! ## Contract
//!
//! - `block_size()` is constant for the lifetime of the cache.
//! - `read`/`write` transfer exactly one full block; short transfers are
//!   errors. Each write is assumed atomic at the block granularity.
//! - `notify_allocate_block` / `notify_deallocate_block` are advisory hooks
//!   the engine fires when a block changes hands between the free list and
//!   the tree. Caches may use them to prioritize eviction; the defaults do
//!   nothing.
//!
//! ## Implementations
//!
//! - [`MemoryCache`]: heap-backed, for tests and ephemeral indexes.
//! - [`MmapCache`]: a memory-mapped file, for persistent volumes.

mod memory;
mod mmap;

pub use memory::MemoryCache;
pub use mmap::MmapCache;

use eyre::Result;

/// Identifier of a block within a cache. Block 0 is reserved for the
/// superblock and doubles as the free-list terminator.
pub type BlockId = u64;

/// Fixed-size block storage consumed by the tree engine.
pub trait BlockCache {
    /// Size in bytes of every block. Constant for the cache's lifetime.
    fn block_size(&self) -> usize;

    /// Number of addressable blocks.
    fn num_blocks(&self) -> u64;

    /// Reads block `block` into `buf`. `buf.len()` must equal `block_size()`.
    fn read(&mut self, block: BlockId, buf: &mut [u8]) -> Result<()>;

    /// Writes `buf` as block `block`. `buf.len()` must equal `block_size()`.
    fn write(&mut self, block: BlockId, buf: &[u8]) -> Result<()>;

    /// Advisory: `block` left the free list and joined the tree.
    fn notify_allocate_block(&mut self, _block: BlockId) {}

    /// Advisory: `block` left the tree and joined the free list.
    fn notify_deallocate_block(&mut self, _block: BlockId) {}
}
