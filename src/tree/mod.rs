//! # Tree Engine
//!
//! This module implements the B-tree engine over a [`BlockCache`]: attach
//! and detach, point lookup, insert with split-on-overflow, in-place update,
//! depth-first display, and a structural sanity check.
//!
//! ## Volume Layout
//!
//! A freshly formatted volume of `N` blocks looks like this:
//!
//! ```text
//! block 0   SUPERBLOCK   rootnode = 1, freelist = 2, numkeys = 0
//! block 1   ROOT         numkeys = 0 (rewritten as LEAF by the first insert)
//! block 2   FREE -> 3
//! block 3   FREE -> 4
//! ...
//! block N-1 FREE -> 0
//! ```
//!
//! Every block is in exactly one of three places at all times: the
//! superblock, the tree reachable from `superblock.rootnode`, or the free
//! list threaded through block headers.
//!
//! ## Insert Algorithm
//!
//! ```text
//! 1. Empty index: rewrite the root block as a LEAF holding the pair.
//! 2. Descend from the root by strict key comparison, recording the path.
//! 3. Insert into the leaf at its sorted offset.
//! 4. If the leaf reached the fill threshold: split it around the midpoint,
//!    copy the right half's first key up as the separator.
//! 5. Propagate the separator up the recorded path. An interior node that
//!    reaches the threshold splits around its middle key, which moves up
//!    and lands in neither half.
//! 6. If the old root split, allocate a fresh ROOT holding the one
//!    promoted key; the old root becomes INTERIOR (or stays LEAF).
//! ```
//!
//! Splits happen *after* the insert, gated by the 2/3 fill threshold, so a
//! node is never physically full when an insert lands in it.
//!
//! ## Failure Atomicity
//!
//! There is no journal. The engine reserves every block a worst-case split
//! cascade could need *before* writing anything, so running out of space
//! reports [`IndexError::NoSpace`] with the volume untouched. Any other
//! mid-mutation failure (an I/O error from the cache) leaves the volume in
//! an undefined state; recovery is the caller's concern.
//!
//! ## Concurrency
//!
//! The engine is single-threaded and runs every operation to completion.
//! It holds at most O(tree height) node images in memory: the descent path
//! plus split scratch. Callers serialize access.

mod alloc;
mod check;
mod display;

pub use display::DisplayMode;

use eyre::{bail, ensure, eyre, Result};
use smallvec::SmallVec;
use tracing::debug;

use crate::cache::{BlockCache, BlockId};
use crate::config::{FillPolicy, MIN_BLOCK_SIZE, PTR_SIZE};
use crate::error::IndexError;
use crate::node::{Node, NodeType, NODE_HEADER_SIZE};

/// Descent path from the root to a leaf's parent: `(block id, numkeys)` per
/// interior node, root first.
type Path = SmallVec<[(BlockId, usize); 8]>;

/// Disk-backed B-tree index over fixed-size keys and values.
///
/// The engine borrows its block cache for its whole lifetime; all persistent
/// state lives in the cache's blocks plus the in-memory superblock image,
/// which [`BTreeIndex::detach`] writes back.
#[derive(Debug)]
pub struct BTreeIndex<'a, C: BlockCache> {
    cache: &'a mut C,
    keysize: u32,
    valuesize: u32,
    unique: bool,
    fill: FillPolicy,
    superblock: Option<Node>,
    superblock_id: BlockId,
}

impl<'a, C: BlockCache> BTreeIndex<'a, C> {
    /// Constructs an unattached engine for `keysize`-byte keys and
    /// `valuesize`-byte values.
    ///
    /// With `unique` set, inserting an already-present key fails with
    /// [`IndexError::KeyExists`]; otherwise duplicates are accepted and the
    /// descent tie-break decides which copy a lookup returns.
    pub fn new(keysize: u32, valuesize: u32, cache: &'a mut C, unique: bool) -> Result<Self> {
        let fill = FillPolicy::default();
        validate_geometry(keysize, valuesize, cache.block_size(), &fill)?;

        Ok(Self {
            cache,
            keysize,
            valuesize,
            unique,
            fill,
            superblock: None,
            superblock_id: 0,
        })
    }

    /// Replaces the split threshold ratio. Testing hook; persistent volumes
    /// interoperate only at the default 2/3.
    pub fn with_fill_policy(mut self, fill: FillPolicy) -> Result<Self> {
        validate_geometry(self.keysize, self.valuesize, self.cache.block_size(), &fill)?;
        self.fill = fill;
        Ok(self)
    }

    pub fn keysize(&self) -> u32 {
        self.keysize
    }

    pub fn valuesize(&self) -> u32 {
        self.valuesize
    }

    /// Block id of the current root. Fails when unattached.
    pub fn root_block(&self) -> Result<BlockId> {
        let sb = self.superblock.as_ref().ok_or_else(|| eyre!("index not attached"))?;
        Ok(sb.rootnode())
    }

    /// Total number of keys in the index. Fails when unattached.
    pub fn num_keys(&self) -> Result<u64> {
        let sb = self.superblock.as_ref().ok_or_else(|| eyre!("index not attached"))?;
        Ok(sb.numkeys() as u64)
    }

    /// Mounts the index whose superblock lives at `initblock` (always 0).
    ///
    /// With `create`, the volume is formatted first: superblock at 0, an
    /// empty root at 1, and every remaining block threaded onto the free
    /// list.
    pub fn attach(&mut self, initblock: BlockId, create: bool) -> Result<()> {
        ensure!(
            initblock == 0,
            "superblock must live at block 0 (got {})",
            initblock
        );

        if create {
            self.format()?;
        }

        let superblock = Node::read(self.cache, initblock)?;
        ensure!(
            superblock.node_type() == NodeType::Superblock,
            "block {} is {:?}, not a superblock",
            initblock,
            superblock.node_type()
        );

        // The superblock's widths are authoritative from here on.
        let keysize = superblock.keysize() as u32;
        let valuesize = superblock.valuesize() as u32;
        validate_geometry(keysize, valuesize, self.cache.block_size(), &self.fill)?;

        self.keysize = keysize;
        self.valuesize = valuesize;
        self.superblock = Some(superblock);
        self.superblock_id = initblock;
        Ok(())
    }

    /// Writes the in-memory superblock back to its block.
    pub fn detach(&mut self) -> Result<()> {
        let sb = self.superblock.as_ref().ok_or_else(|| eyre!("index not attached"))?;
        sb.write(self.cache, self.superblock_id)
    }

    fn format(&mut self) -> Result<()> {
        let num_blocks = self.cache.num_blocks();
        let block_size = self.cache.block_size();
        ensure!(
            num_blocks >= 2,
            "volume needs at least 2 blocks (superblock and root), got {}",
            num_blocks
        );

        let mut superblock =
            Node::new(NodeType::Superblock, self.keysize, self.valuesize, block_size)?;
        superblock.set_rootnode(1);
        superblock.set_freelist(if num_blocks > 2 { 2 } else { 0 });
        self.cache.notify_allocate_block(0);
        superblock.write(self.cache, 0)?;

        let root = Node::new(NodeType::Root, self.keysize, self.valuesize, block_size)?;
        self.cache.notify_allocate_block(1);
        root.write(self.cache, 1)?;

        for block in 2..num_blocks {
            let mut free = Node::new(NodeType::Free, self.keysize, self.valuesize, block_size)?;
            free.set_freelist(if block + 1 == num_blocks { 0 } else { block + 1 });
            free.write(self.cache, block)?;
        }

        debug!(blocks = num_blocks, block_size, "formatted volume");
        Ok(())
    }

    /// Point lookup. `Ok(None)` when the key is absent.
    pub fn lookup(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_key(key)?;

        let Some((_, leaf)) = self.find_leaf(key)? else {
            return Ok(None);
        };
        match leaf.leaf_find(key)? {
            Some(slot) => Ok(Some(leaf.value_at(slot)?.to_vec())),
            None => Ok(None),
        }
    }

    /// Overwrites the value of an existing key in place. Never changes the
    /// tree structure or any key count. Fails with
    /// [`IndexError::KeyNotFound`] when the key is absent.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;

        let Some((block, mut leaf)) = self.find_leaf(key)? else {
            return Err(IndexError::KeyNotFound.into());
        };
        let Some(slot) = leaf.leaf_find(key)? else {
            return Err(IndexError::KeyNotFound.into());
        };
        leaf.set_value(slot, value)?;
        leaf.write(self.cache, block)
    }

    /// Inserts a `(key, value)` pair, splitting nodes as needed.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;

        let sb = self.superblock.as_ref().ok_or_else(|| eyre!("index not attached"))?;
        let root = sb.rootnode();

        if sb.numkeys() == 0 {
            return self.insert_first(root, key, value);
        }

        let mut path: Path = SmallVec::new();
        let mut current = root;
        let mut leaf = loop {
            let node = Node::read(self.cache, current)?;
            match node.node_type() {
                NodeType::Leaf => break node,
                NodeType::Root | NodeType::Interior => {
                    ensure!(
                        node.numkeys() > 0,
                        "block {}: empty {:?} node in a non-empty index",
                        current,
                        node.node_type()
                    );
                    let slot = node.search_slot(key)?;
                    let child = node.ptr_at(slot)?;
                    path.push((current, node.numkeys()));
                    current = child;
                }
                other => bail!("block {}: {:?} node on the descent path", current, other),
            }
        };

        let offset = leaf.search_slot(key)?;
        if self.unique && offset > 0 && leaf.key_at(offset - 1)? == key {
            return Err(IndexError::KeyExists.into());
        }

        // Reserve the worst-case split cascade up front so NoSpace surfaces
        // before any block is written.
        self.reserve_for_insert(&leaf, &path)?;

        leaf.leaf_insert_at(offset, key, value)?;

        if leaf.numkeys() < self.fill.threshold(leaf.leaf_slot_capacity()) {
            leaf.write(self.cache, current)?;
        } else {
            self.split_leaf(current, leaf, path)?;
        }
        self.bump_numkeys()
    }

    /// Not implemented: always fails with [`IndexError::Unimplemented`].
    /// Removing keys requires merge-on-underflow, which the on-disk format
    /// does not yet commit to.
    pub fn delete(&mut self, _key: &[u8]) -> Result<()> {
        Err(IndexError::Unimplemented.into())
    }

    /// First insert into a freshly formatted index: the root block becomes
    /// a leaf holding the single pair.
    fn insert_first(&mut self, root: BlockId, key: &[u8], value: &[u8]) -> Result<()> {
        let mut node = Node::read(self.cache, root)?;
        match node.node_type() {
            NodeType::Root | NodeType::Leaf => {}
            other => bail!("block {}: {:?} root in an empty index", root, other),
        }
        node.set_node_type(NodeType::Leaf);
        node.leaf_insert_at(0, key, value)?;
        node.write(self.cache, root)?;
        self.bump_numkeys()
    }

    /// Walks from the root to the leaf that covers `key`. `Ok(None)` only
    /// for an empty index.
    fn find_leaf(&mut self, key: &[u8]) -> Result<Option<(BlockId, Node)>> {
        let sb = self.superblock.as_ref().ok_or_else(|| eyre!("index not attached"))?;
        let mut current = sb.rootnode();

        loop {
            let node = Node::read(self.cache, current)?;
            match node.node_type() {
                NodeType::Leaf => return Ok(Some((current, node))),
                NodeType::Root | NodeType::Interior => {
                    if node.numkeys() == 0 {
                        return Ok(None);
                    }
                    let slot = node.search_slot(key)?;
                    current = node.ptr_at(slot)?;
                }
                other => bail!("block {}: {:?} node on the descent path", current, other),
            }
        }
    }

    fn split_leaf(&mut self, leaf_id: BlockId, mut leaf: Node, path: Path) -> Result<()> {
        let right_id = self.allocate_node()?;
        let mut right = Node::new(
            NodeType::Leaf,
            self.keysize,
            self.valuesize,
            self.cache.block_size(),
        )?;

        let n = leaf.numkeys();
        let mid = n / 2;
        for i in mid..n {
            right.leaf_insert_at(i - mid, leaf.key_at(i)?, leaf.value_at(i)?)?;
        }
        leaf.leaf_truncate(mid)?;

        let separator = right.key_at(0)?.to_vec();
        leaf.write(self.cache, leaf_id)?;
        right.write(self.cache, right_id)?;
        debug!(left = leaf_id, right = right_id, keys = n, "split leaf");

        self.propagate_split(path, separator, leaf_id, right_id)
    }

    /// Bubbles a separator/right-child pair up the descent path, splitting
    /// interior nodes that reach the threshold. The promoted middle key of
    /// an interior split lands in neither half.
    fn propagate_split(
        &mut self,
        mut path: Path,
        mut separator: Vec<u8>,
        mut left: BlockId,
        mut right: BlockId,
    ) -> Result<()> {
        while let Some((parent_id, _)) = path.pop() {
            let mut parent = Node::read(self.cache, parent_id)?;
            ensure!(
                parent.node_type().is_interior_kind(),
                "block {}: {:?} node on the descent path",
                parent_id,
                parent.node_type()
            );

            let offset = parent.search_slot(&separator)?;
            parent.interior_insert_at(offset, &separator, right)?;

            if parent.numkeys() < self.fill.threshold(parent.interior_slot_capacity()) {
                return parent.write(self.cache, parent_id);
            }

            let new_id = self.allocate_node()?;
            let mut new_right = Node::new(
                NodeType::Interior,
                self.keysize,
                self.valuesize,
                self.cache.block_size(),
            )?;

            let n = parent.numkeys();
            let mid = n / 2;
            let promoted = parent.key_at(mid)?.to_vec();
            new_right.set_ptr(0, parent.ptr_at(mid + 1)?)?;
            for i in mid + 1..n {
                new_right.interior_insert_at(i - mid - 1, parent.key_at(i)?, parent.ptr_at(i + 1)?)?;
            }
            parent.interior_truncate(mid)?;
            if parent.node_type() == NodeType::Root {
                parent.set_node_type(NodeType::Interior);
            }
            parent.write(self.cache, parent_id)?;
            new_right.write(self.cache, new_id)?;
            debug!(left = parent_id, right = new_id, "split interior");

            separator = promoted;
            left = parent_id;
            right = new_id;
        }

        self.grow_root(&separator, left, right)
    }

    /// The old root split: allocate a fresh root over the two halves and
    /// repoint the superblock.
    fn grow_root(&mut self, separator: &[u8], left: BlockId, right: BlockId) -> Result<()> {
        let new_root_id = self.allocate_node()?;
        let mut root = Node::new(
            NodeType::Root,
            self.keysize,
            self.valuesize,
            self.cache.block_size(),
        )?;
        root.set_ptr(0, left)?;
        root.interior_insert_at(0, separator, right)?;
        root.write(self.cache, new_root_id)?;

        let sb = self.superblock.as_mut().ok_or_else(|| eyre!("index not attached"))?;
        sb.set_rootnode(new_root_id);
        sb.write(self.cache, self.superblock_id)?;
        debug!(root = new_root_id, left, right, "grew new root");
        Ok(())
    }

    /// Counts the blocks a worst-case split cascade would allocate and
    /// fails with [`IndexError::NoSpace`] when the free list cannot cover
    /// them. Read-only; called before the insert mutates anything.
    fn reserve_for_insert(&mut self, leaf: &Node, path: &[(BlockId, usize)]) -> Result<()> {
        if leaf.numkeys() + 1 < self.fill.threshold(leaf.leaf_slot_capacity()) {
            return Ok(());
        }

        let interior_threshold = self.fill.threshold(self.interior_capacity());
        let mut needed: u64 = 1;
        let mut cascades_to_root = true;
        for &(_, numkeys) in path.iter().rev() {
            if numkeys + 1 >= interior_threshold {
                needed += 1;
            } else {
                cascades_to_root = false;
                break;
            }
        }
        if cascades_to_root {
            needed += 1;
        }
        self.ensure_free_blocks(needed)
    }

    fn interior_capacity(&self) -> usize {
        (self.cache.block_size() - NODE_HEADER_SIZE - PTR_SIZE)
            / (self.keysize as usize + PTR_SIZE)
    }

    fn bump_numkeys(&mut self) -> Result<()> {
        let sb = self.superblock.as_mut().ok_or_else(|| eyre!("index not attached"))?;
        let total = sb.numkeys();
        sb.set_numkeys(total + 1);
        sb.write(self.cache, self.superblock_id)
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        ensure!(
            key.len() == self.keysize as usize,
            "key length {} != keysize {}",
            key.len(),
            self.keysize
        );
        Ok(())
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        ensure!(
            value.len() == self.valuesize as usize,
            "value length {} != valuesize {}",
            value.len(),
            self.valuesize
        );
        Ok(())
    }
}

fn validate_geometry(
    keysize: u32,
    valuesize: u32,
    block_size: usize,
    fill: &FillPolicy,
) -> Result<()> {
    ensure!(keysize > 0, "keysize must be positive");
    ensure!(valuesize > 0, "valuesize must be positive");
    ensure!(
        block_size >= MIN_BLOCK_SIZE,
        "block size {} below minimum {}",
        block_size,
        MIN_BLOCK_SIZE
    );

    let payload = block_size - NODE_HEADER_SIZE;
    let leaf_capacity = payload / (keysize as usize + valuesize as usize);
    let interior_capacity = (payload - PTR_SIZE) / (keysize as usize + PTR_SIZE);

    // A split with threshold t leaves t/2 and t - t/2 (leaf) or t - t/2 - 1
    // (interior) keys per half; both halves must stay non-empty.
    ensure!(
        fill.threshold(leaf_capacity) >= 2,
        "block size {} holds too few {}+{}-byte leaf slots to split",
        block_size,
        keysize,
        valuesize
    );
    ensure!(
        fill.threshold(interior_capacity) >= 3,
        "block size {} holds too few {}-byte separator slots to split",
        block_size,
        keysize
    );
    ensure!(
        fill.threshold(leaf_capacity) < leaf_capacity
            && fill.threshold(interior_capacity) < interior_capacity,
        "fill threshold must stay below slot capacity"
    );
    Ok(())
}
