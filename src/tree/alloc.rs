//! Free-list allocator.
//!
//! Unallocated blocks form a singly linked list threaded through the
//! `freelist` field of their headers, rooted at the superblock and
//! terminated by block 0. Allocation pops the head; deallocation pushes.
//! Both rewrite the superblock so the head on disk is always current, and
//! both fire the cache's advisory notification hooks.

use eyre::{ensure, eyre, Result};
use tracing::trace;

use super::BTreeIndex;
use crate::cache::{BlockCache, BlockId};
use crate::error::IndexError;
use crate::node::{Node, NodeType};

impl<'a, C: BlockCache> BTreeIndex<'a, C> {
    /// Pops a block off the free list and hands it to the caller, which is
    /// responsible for writing a fresh node image to it.
    ///
    /// Fails with [`IndexError::NoSpace`] when the list is empty, and with
    /// a corruption error when the head is not marked free.
    pub fn allocate_node(&mut self) -> Result<BlockId> {
        let sb = self.superblock.as_ref().ok_or_else(|| eyre!("index not attached"))?;
        let head = sb.freelist();
        if head == 0 {
            return Err(IndexError::NoSpace.into());
        }

        let node = Node::read(self.cache, head)?;
        ensure!(
            node.node_type() == NodeType::Free,
            "free list head {} is {:?}, not free",
            head,
            node.node_type()
        );
        let next = node.freelist();

        let sb = self.superblock.as_mut().ok_or_else(|| eyre!("index not attached"))?;
        sb.set_freelist(next);
        sb.write(self.cache, self.superblock_id)?;
        self.cache.notify_allocate_block(head);
        trace!(block = head, next, "allocated block");
        Ok(head)
    }

    /// Pushes a tree block back onto the free list, rewriting it as a
    /// zero-filled FREE node linking the old head.
    pub fn deallocate_node(&mut self, block: BlockId) -> Result<()> {
        ensure!(
            block != self.superblock_id,
            "cannot free the superblock (block {})",
            block
        );

        let node = Node::read(self.cache, block)?;
        ensure!(
            node.node_type() != NodeType::Free,
            "block {} is already free",
            block
        );

        let sb = self.superblock.as_mut().ok_or_else(|| eyre!("index not attached"))?;
        let head = sb.freelist();

        let mut free = Node::new(
            NodeType::Free,
            self.keysize,
            self.valuesize,
            self.cache.block_size(),
        )?;
        free.set_freelist(head);
        free.write(self.cache, block)?;

        sb.set_freelist(block);
        sb.write(self.cache, self.superblock_id)?;
        self.cache.notify_deallocate_block(block);
        trace!(block, "deallocated block");
        Ok(())
    }

    /// Verifies the free list holds at least `needed` blocks without
    /// popping any of them.
    pub(super) fn ensure_free_blocks(&mut self, needed: u64) -> Result<()> {
        let sb = self.superblock.as_ref().ok_or_else(|| eyre!("index not attached"))?;
        let mut current = sb.freelist();

        let mut available = 0u64;
        while current != 0 && available < needed {
            let node = Node::read(self.cache, current)?;
            ensure!(
                node.node_type() == NodeType::Free,
                "free list entry {} is {:?}, not free",
                current,
                node.node_type()
            );
            available += 1;
            current = node.freelist();
        }

        if available < needed {
            return Err(IndexError::NoSpace.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn attached(cache: &mut MemoryCache) -> BTreeIndex<'_, MemoryCache> {
        let mut index = BTreeIndex::new(8, 8, cache, false).unwrap();
        index.attach(0, true).unwrap();
        index
    }

    #[test]
    fn allocate_pops_blocks_in_list_order() {
        let mut cache = MemoryCache::new(512, 6);
        let mut index = attached(&mut cache);

        assert_eq!(index.allocate_node().unwrap(), 2);
        assert_eq!(index.allocate_node().unwrap(), 3);
        assert_eq!(index.allocate_node().unwrap(), 4);
        assert_eq!(index.allocate_node().unwrap(), 5);

        let err = index.allocate_node().unwrap_err();
        assert_eq!(err.downcast_ref::<IndexError>(), Some(&IndexError::NoSpace));
    }

    #[test]
    fn allocate_persists_the_new_head() {
        let mut cache = MemoryCache::new(512, 6);
        let mut index = attached(&mut cache);

        index.allocate_node().unwrap();
        drop(index);

        let superblock = Node::read(&mut cache, 0).unwrap();
        assert_eq!(superblock.freelist(), 3);
    }

    #[test]
    fn allocate_fires_cache_notification() {
        let mut cache = MemoryCache::new(512, 6);
        let mut index = attached(&mut cache);

        index.allocate_node().unwrap();
        index.allocate_node().unwrap();
        drop(index);

        // Two allocations here, plus superblock and root at format time.
        assert_eq!(cache.allocations(), 4);
    }

    #[test]
    fn deallocate_pushes_onto_the_head() {
        let mut cache = MemoryCache::new(512, 6);
        let mut index = attached(&mut cache);

        let block = index.allocate_node().unwrap();
        let leaf = Node::new(NodeType::Leaf, 8, 8, 512).unwrap();
        leaf.write(index.cache, block).unwrap();

        index.deallocate_node(block).unwrap();

        assert_eq!(index.allocate_node().unwrap(), block);
        drop(index);
        assert_eq!(cache.deallocations(), 1);
    }

    #[test]
    fn deallocate_rewrites_block_as_zeroed_free_node() {
        let mut cache = MemoryCache::new(512, 6);
        let mut index = attached(&mut cache);

        let block = index.allocate_node().unwrap();
        let mut leaf = Node::new(NodeType::Leaf, 8, 8, 512).unwrap();
        leaf.leaf_insert_at(0, b"aaaaaaaa", b"00000001").unwrap();
        leaf.write(index.cache, block).unwrap();

        index.deallocate_node(block).unwrap();
        drop(index);

        let free = Node::read(&mut cache, block).unwrap();
        assert_eq!(free.node_type(), NodeType::Free);
        assert_eq!(free.freelist(), 3);
        assert_eq!(free.numkeys(), 0);

        let mut expected = Node::new(NodeType::Free, 8, 8, 512).unwrap();
        expected.set_freelist(3);
        assert_eq!(free.as_bytes(), expected.as_bytes());
    }

    #[test]
    fn deallocate_rejects_free_blocks_and_the_superblock() {
        let mut cache = MemoryCache::new(512, 6);
        let mut index = attached(&mut cache);

        assert!(index.deallocate_node(0).is_err());
        assert!(index.deallocate_node(3).is_err());
    }

    #[test]
    fn allocate_rejects_corrupt_free_list_head() {
        let mut cache = MemoryCache::new(512, 6);
        let mut index = attached(&mut cache);

        let leaf = Node::new(NodeType::Leaf, 8, 8, 512).unwrap();
        leaf.write(index.cache, 2).unwrap();

        let err = index.allocate_node().unwrap_err();
        assert!(err.to_string().contains("not free"));
    }

    #[test]
    fn ensure_free_blocks_counts_without_popping() {
        let mut cache = MemoryCache::new(512, 6);
        let mut index = attached(&mut cache);

        index.ensure_free_blocks(4).unwrap();
        let err = index.ensure_free_blocks(5).unwrap_err();
        assert_eq!(err.downcast_ref::<IndexError>(), Some(&IndexError::NoSpace));

        assert_eq!(index.allocate_node().unwrap(), 2);
    }
}
