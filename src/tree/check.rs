//! Structural sanity check.
//!
//! Walks the whole volume and verifies the invariants the engine promises
//! between calls:
//!
//! - every block reachable from the root is a legal tree node, reached by
//!   exactly one path
//! - keys ascend within every node and respect their subtree's bounds
//! - every non-root node sits below the fill threshold
//! - the free list is acyclic and holds only FREE nodes
//! - tree blocks, free blocks, and the superblock partition the volume
//! - the superblock's key count matches the keys actually in the leaves
//!
//! For a unique index, key order is checked strictly everywhere. A
//! non-unique index legitimately holds equal keys - within one leaf, across
//! leaf boundaries, and as repeated separators - so ordering and bound
//! checks relax to non-strict there.

use std::collections::BTreeSet;

use eyre::{bail, ensure, eyre, Result};

use super::BTreeIndex;
use crate::cache::{BlockCache, BlockId};
use crate::node::{Node, NodeType};

struct CheckState {
    leaf_keys: u64,
    prev_key: Option<Vec<u8>>,
}

impl<'a, C: BlockCache> BTreeIndex<'a, C> {
    /// Verifies every structural invariant of the attached volume. Any
    /// violation is reported as an error naming the offending block.
    pub fn sanity_check(&mut self) -> Result<()> {
        let sb = self.superblock.as_ref().ok_or_else(|| eyre!("index not attached"))?;
        let root = sb.rootnode();
        let expected_keys = sb.numkeys() as u64;
        let free_head = sb.freelist();
        let num_blocks = self.cache.num_blocks();

        let mut tree_blocks = BTreeSet::new();
        let mut state = CheckState {
            leaf_keys: 0,
            prev_key: None,
        };
        self.check_node(root, None, None, true, &mut tree_blocks, &mut state)?;

        ensure!(
            state.leaf_keys == expected_keys,
            "superblock numkeys {} != {} keys found in leaves",
            expected_keys,
            state.leaf_keys
        );

        let mut free_blocks = BTreeSet::new();
        let mut current = free_head;
        while current != 0 {
            ensure!(
                current < num_blocks,
                "free list entry {} out of bounds (num_blocks={})",
                current,
                num_blocks
            );
            ensure!(
                free_blocks.insert(current),
                "free list cycles back to block {}",
                current
            );
            ensure!(
                !tree_blocks.contains(&current),
                "block {} is both in the tree and on the free list",
                current
            );
            let node = Node::read(self.cache, current)?;
            ensure!(
                node.node_type() == NodeType::Free,
                "free list entry {} is {:?}, not free",
                current,
                node.node_type()
            );
            current = node.freelist();
        }

        let accounted = 1 + tree_blocks.len() as u64 + free_blocks.len() as u64;
        ensure!(
            accounted == num_blocks,
            "{} of {} blocks accounted for (tree={}, free={}, superblock=1)",
            accounted,
            num_blocks,
            tree_blocks.len(),
            free_blocks.len()
        );
        Ok(())
    }

    fn check_node(
        &mut self,
        block: BlockId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        is_root: bool,
        visited: &mut BTreeSet<BlockId>,
        state: &mut CheckState,
    ) -> Result<()> {
        ensure!(
            block != self.superblock_id,
            "tree references the superblock"
        );
        ensure!(
            block < self.cache.num_blocks(),
            "tree references out-of-bounds block {}",
            block
        );
        ensure!(
            visited.insert(block),
            "block {} reached by more than one path",
            block
        );

        let node = Node::read(self.cache, block)?;
        let n = node.numkeys();

        match node.node_type() {
            NodeType::Leaf => {
                ensure!(
                    n <= node.leaf_slot_capacity(),
                    "leaf {} overflows its block (numkeys={}, capacity={})",
                    block,
                    n,
                    node.leaf_slot_capacity()
                );
                if !is_root {
                    let threshold = self.fill.threshold(node.leaf_slot_capacity());
                    ensure!(
                        n < threshold,
                        "leaf {} too full (numkeys={}, threshold={})",
                        block,
                        n,
                        threshold
                    );
                }
                for i in 0..n {
                    let key = node.key_at(i)?;
                    self.check_key_order(block, &node, i, key, lower, upper)?;
                    if let Some(prev) = &state.prev_key {
                        if self.unique {
                            ensure!(
                                key > prev.as_slice(),
                                "duplicate or misordered key across leaves at block {}",
                                block
                            );
                        } else {
                            ensure!(
                                key >= prev.as_slice(),
                                "in-order key regression at block {}",
                                block
                            );
                        }
                    }
                    state.prev_key = Some(key.to_vec());
                }
                state.leaf_keys += n as u64;
            }
            t @ (NodeType::Root | NodeType::Interior) => {
                if is_root {
                    ensure!(
                        t == NodeType::Root,
                        "root block {} carries {:?}, expected Root",
                        block,
                        t
                    );
                } else {
                    ensure!(
                        t == NodeType::Interior,
                        "block {} below the root carries {:?}",
                        block,
                        t
                    );
                }

                if n == 0 {
                    // Only a freshly formatted, still-empty index has a
                    // childless root.
                    ensure!(is_root, "empty interior node at block {}", block);
                    return Ok(());
                }

                ensure!(
                    n <= node.interior_slot_capacity(),
                    "interior {} overflows its block (numkeys={}, capacity={})",
                    block,
                    n,
                    node.interior_slot_capacity()
                );
                if !is_root {
                    let threshold = self.fill.threshold(node.interior_slot_capacity());
                    ensure!(
                        n < threshold,
                        "interior {} too full (numkeys={}, threshold={})",
                        block,
                        n,
                        threshold
                    );
                }
                for i in 0..n {
                    let key = node.key_at(i)?;
                    self.check_key_order(block, &node, i, key, lower, upper)?;
                }
                for i in 0..=n {
                    let child = node.ptr_at(i)?;
                    let child_lower = if i == 0 { lower } else { Some(node.key_at(i - 1)?) };
                    let child_upper = if i == n { upper } else { Some(node.key_at(i)?) };
                    self.check_node(child, child_lower, child_upper, false, visited, state)?;
                }
            }
            other => bail!("block {}: {:?} node reachable from the root", block, other),
        }
        Ok(())
    }

    fn check_key_order(
        &self,
        block: BlockId,
        node: &Node,
        i: usize,
        key: &[u8],
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> Result<()> {
        if i > 0 {
            let prev = node.key_at(i - 1)?;
            if self.unique {
                ensure!(
                    prev < key,
                    "block {}: keys not strictly ascending at slot {}",
                    block,
                    i
                );
            } else {
                ensure!(
                    prev <= key,
                    "block {}: keys not ascending at slot {}",
                    block,
                    i
                );
            }
        }
        if let Some(lo) = lower {
            ensure!(
                key >= lo,
                "block {}: key at slot {} below its subtree bound",
                block,
                i
            );
        }
        if let Some(hi) = upper {
            if self.unique {
                ensure!(
                    key < hi,
                    "block {}: key at slot {} above its subtree bound",
                    block,
                    i
                );
            } else {
                ensure!(
                    key <= hi,
                    "block {}: key at slot {} above its subtree bound",
                    block,
                    i
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::node::NODE_HEADER_SIZE;

    fn populated(cache: &mut MemoryCache, keys: usize) -> BTreeIndex<'_, MemoryCache> {
        let mut index = BTreeIndex::new(8, 8, cache, false).unwrap();
        index.attach(0, true).unwrap();
        for i in 0..keys {
            let key = format!("key{:05}", i);
            let value = format!("{:08}", i);
            index.insert(key.as_bytes(), value.as_bytes()).unwrap();
        }
        index
    }

    #[test]
    fn empty_index_is_sane() {
        let mut cache = MemoryCache::new(512, 16);
        let mut index = BTreeIndex::new(8, 8, &mut cache, false).unwrap();
        index.attach(0, true).unwrap();

        index.sanity_check().unwrap();
    }

    #[test]
    fn populated_index_is_sane() {
        let mut cache = MemoryCache::new(512, 128);
        let mut index = populated(&mut cache, 100);

        index.sanity_check().unwrap();
    }

    #[test]
    fn detects_corrupt_node_type_in_tree() {
        let mut cache = MemoryCache::new(512, 64);
        {
            let mut index = populated(&mut cache, 30);
            index.detach().unwrap();
        }

        // Stamp a free-node header onto a block the tree still references.
        let mut corrupt = Node::new(NodeType::Free, 8, 8, 512).unwrap();
        corrupt.set_freelist(0);
        {
            let mut probe = BTreeIndex::new(8, 8, &mut cache, false).unwrap();
            probe.attach(0, false).unwrap();
            let root = probe.root_block().unwrap();
            let root_node = Node::read(probe.cache, root).unwrap();
            let victim = root_node.ptr_at(0).unwrap();
            corrupt.write(probe.cache, victim).unwrap();

            let err = probe.sanity_check().unwrap_err();
            assert!(err.to_string().contains("reachable from the root"));
        }
    }

    #[test]
    fn detects_numkeys_drift() {
        let mut cache = MemoryCache::new(512, 64);
        let mut index = populated(&mut cache, 10);

        let sb = index.superblock.as_mut().unwrap();
        sb.set_numkeys(11);

        let err = index.sanity_check().unwrap_err();
        assert!(err.to_string().contains("numkeys"));
    }

    #[test]
    fn detects_misordered_leaf_keys() {
        let mut cache = MemoryCache::new(512, 64);
        {
            let mut index = populated(&mut cache, 5);
            index.detach().unwrap();
        }

        let mut root = Node::read(&mut cache, 1).unwrap();
        root.set_key(0, b"zzzzzzzz").unwrap();
        root.write(&mut cache, 1).unwrap();

        let mut index = BTreeIndex::new(8, 8, &mut cache, false).unwrap();
        index.attach(0, false).unwrap();

        let err = index.sanity_check().unwrap_err();
        assert!(err.to_string().contains("not ascending"));
    }

    #[test]
    fn detects_free_list_cycle() {
        let mut cache = MemoryCache::new(512, 8);
        {
            let mut index = BTreeIndex::new(8, 8, &mut cache, false).unwrap();
            index.attach(0, true).unwrap();
            index.detach().unwrap();
        }

        // Point the tail of the free list back at its head.
        let mut tail = Node::read(&mut cache, 7).unwrap();
        tail.set_freelist(2);
        tail.write(&mut cache, 7).unwrap();

        let mut index = BTreeIndex::new(8, 8, &mut cache, false).unwrap();
        index.attach(0, false).unwrap();

        let err = index.sanity_check().unwrap_err();
        assert!(err.to_string().contains("cycles"));
    }

    #[test]
    fn detects_leaked_block() {
        let mut cache = MemoryCache::new(512, 8);
        {
            let mut index = BTreeIndex::new(8, 8, &mut cache, false).unwrap();
            index.attach(0, true).unwrap();
            // Pop a block and put it nowhere: not in the tree, not free.
            index.allocate_node().unwrap();
            index.detach().unwrap();
        }

        let mut index = BTreeIndex::new(8, 8, &mut cache, false).unwrap();
        index.attach(0, false).unwrap();

        let err = index.sanity_check().unwrap_err();
        assert!(err.to_string().contains("accounted"));
    }

    #[test]
    fn unique_index_rejects_smuggled_duplicate() {
        let mut cache = MemoryCache::new(512, 64);
        {
            let mut index = BTreeIndex::new(8, 8, &mut cache, true).unwrap();
            index.attach(0, true).unwrap();
            for i in 0..3 {
                let key = format!("key{:05}", i);
                index.insert(key.as_bytes(), b"00000000").unwrap();
            }
            index.detach().unwrap();
        }

        // Overwrite a leaf key with its neighbor, creating a duplicate.
        let mut root = Node::read(&mut cache, 1).unwrap();
        let neighbor = root.key_at(1).unwrap().to_vec();
        root.set_key(0, &neighbor).unwrap();
        root.write(&mut cache, 1).unwrap();

        let mut index = BTreeIndex::new(8, 8, &mut cache, true).unwrap();
        index.attach(0, false).unwrap();

        let err = index.sanity_check().unwrap_err();
        assert!(err.to_string().contains("ascending"));
    }

    #[test]
    fn zeroed_payload_is_required_for_byte_exact_images() {
        let mut cache = MemoryCache::new(512, 64);
        let mut index = populated(&mut cache, 40);
        index.detach().unwrap();
        let root = index.root_block().unwrap();
        drop(index);

        // Every tree block's payload beyond its live slots stays zero.
        let root_node = Node::read(&mut cache, root).unwrap();
        for i in 0..=root_node.numkeys() {
            let child = Node::read(&mut cache, root_node.ptr_at(i).unwrap()).unwrap();
            let live = NODE_HEADER_SIZE + child.numkeys() * 16;
            assert!(
                child.as_bytes()[live..].iter().all(|&b| b == 0),
                "stale bytes after split in block {}",
                root_node.ptr_at(i).unwrap()
            );
        }
    }
}
