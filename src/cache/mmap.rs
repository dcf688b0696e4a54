//! # Memory-Mapped Block Cache
//!
//! `MmapCache` backs a block volume with a memory-mapped file. Reads and
//! writes are slice copies against the mapping; the OS page cache does the
//! actual I/O. The file size is fixed at creation to
//! `num_blocks * block_size` bytes - the engine's free list manages space
//! within the volume, so the file never grows.
//!
//! ## Durability
//!
//! Writes land in the mapping immediately and reach disk when the OS flushes
//! or when [`MmapCache::sync`] is called. The engine assumes block writes
//! are atomic; that holds for the mapping itself, not for a crash of the
//! machine mid-flush. Crash consistency is out of scope for the index.

use std::fs::OpenOptions;
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

use super::{BlockCache, BlockId};
use crate::config::MIN_BLOCK_SIZE;

#[derive(Debug)]
pub struct MmapCache {
    mmap: MmapMut,
    block_size: usize,
    num_blocks: u64,
}

impl MmapCache {
    /// Creates (or truncates) a volume of `num_blocks` zeroed blocks.
    pub fn create<P: AsRef<Path>>(path: P, block_size: usize, num_blocks: u64) -> Result<Self> {
        let path = path.as_ref();

        ensure!(
            block_size >= MIN_BLOCK_SIZE,
            "block size {} below minimum {}",
            block_size,
            MIN_BLOCK_SIZE
        );
        ensure!(num_blocks > 0, "volume must have at least one block");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create volume '{}'", path.display()))?;

        let file_size = num_blocks * block_size as u64;
        file.set_len(file_size)
            .wrap_err_with(|| format!("failed to set volume size to {} bytes", file_size))?;

        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can
        // be modified externally. This is safe because:
        // 1. We just created this file with exclusive access (truncate=true)
        // 2. The file size is a valid multiple of block_size
        // 3. The mmap lifetime is tied to MmapCache, preventing use-after-unmap
        // 4. All access goes through read()/write() which bounds-check ids
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            mmap,
            block_size,
            num_blocks,
        })
    }

    /// Opens an existing volume. The file size must be a whole number of
    /// blocks of the given size.
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        let path = path.as_ref();

        ensure!(
            block_size >= MIN_BLOCK_SIZE,
            "block size {} below minimum {}",
            block_size,
            MIN_BLOCK_SIZE
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open volume '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        ensure!(
            file_size > 0,
            "cannot open empty volume '{}'",
            path.display()
        );
        ensure!(
            file_size % block_size as u64 == 0,
            "volume '{}' size {} is not a multiple of block size {}",
            path.display(),
            file_size,
            block_size
        );

        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can
        // be modified externally. This is safe because:
        // 1. The file is opened with exclusive read+write access
        // 2. Volume files are not meant to be modified by other processes
        // 3. The mmap lifetime is tied to MmapCache, preventing use-after-unmap
        // 4. All access goes through read()/write() which bounds-check ids
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            mmap,
            block_size,
            num_blocks: file_size / block_size as u64,
        })
    }

    /// Flushes the mapping to disk.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync volume to disk")
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

impl BlockCache for MmapCache {
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
        buf.copy_from_slice(&self.mmap[range]);
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
        self.mmap[range].copy_from_slice(buf);
        Ok(())
    }
}
