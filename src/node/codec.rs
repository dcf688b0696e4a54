//! Block-image codec.
//!
//! [`Node`] is the logical view of one block: the 40-byte header followed by
//! the packed slot payload. It owns its image as a plain `Vec<u8>`, so a
//! deserialized node is a value local to the operation that read it -
//! serialization writes it back through the cache and the value is dropped.
//!
//! Encoding is byte-exact: slots vacated by a truncate are re-zeroed, so two
//! nodes with identical logical content always have identical images.

use eyre::{bail, ensure, Result};

use super::header::{NodeHeader, NodeType, NODE_HEADER_SIZE};
use crate::cache::{BlockCache, BlockId};
use crate::config::{MIN_BLOCK_SIZE, PTR_SIZE};

/// Owned image of a single block plus typed accessors over its slots.
///
/// Slot layout depends on the node's kind:
///
/// ```text
/// LEAF      | header | key0 val0 | key1 val1 | ...            | zeros |
/// INTERIOR  | header | ptr0 key0 | ptr1 key1 | ... | ptrN     | zeros |
/// FREE      | header | zeros                                          |
/// ```
///
/// Interior nodes hold `numkeys + 1` child pointers: `ptr[i]` covers keys
/// `< key[i]` and the trailing pointer covers keys `>= key[numkeys-1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    data: Vec<u8>,
}

impl Node {
    /// Creates a zero-filled node of the given kind.
    ///
    /// The key/value/block widths are stamped into the header; they are
    /// redundant copies of the superblock configuration carried by every
    /// block on disk.
    pub fn new(node_type: NodeType, keysize: u32, valuesize: u32, blocksize: usize) -> Result<Self> {
        ensure!(
            blocksize >= MIN_BLOCK_SIZE,
            "block size {} below minimum {}",
            blocksize,
            MIN_BLOCK_SIZE
        );

        let mut data = vec![0u8; blocksize];
        NodeHeader::new(node_type, keysize, valuesize, blocksize as u32).write_to(&mut data)?;
        Ok(Self { data })
    }

    /// Deserializes the node stored in block `block`.
    ///
    /// Fails when the stored node-type byte is not a legal [`NodeType`], or
    /// when the header's redundant block size disagrees with the cache.
    pub fn read<C: BlockCache>(cache: &mut C, block: BlockId) -> Result<Self> {
        let mut data = vec![0u8; cache.block_size()];
        cache.read(block, &mut data)?;

        let header = NodeHeader::from_bytes(&data)?;
        if header.node_type().is_none() {
            bail!(
                "block {}: bad node type byte {:#04x}",
                block,
                header.node_type_byte()
            );
        }
        ensure!(
            header.blocksize() == 0 || header.blocksize() as usize == data.len(),
            "block {}: header block size {} != cache block size {}",
            block,
            header.blocksize(),
            data.len()
        );

        Ok(Self { data })
    }

    /// Serializes the node into block `block`.
    pub fn write<C: BlockCache>(&self, cache: &mut C, block: BlockId) -> Result<()> {
        cache.write(block, &self.data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn header(&self) -> &NodeHeader {
        NodeHeader::from_bytes(&self.data).unwrap() // INVARIANT: image sized in new()/read()
    }

    fn header_mut(&mut self) -> &mut NodeHeader {
        NodeHeader::from_bytes_mut(&mut self.data).unwrap() // INVARIANT: image sized in new()/read()
    }

    pub fn node_type(&self) -> NodeType {
        self.header().node_type().unwrap() // INVARIANT: byte validated in new()/read()
    }

    pub fn set_node_type(&mut self, node_type: NodeType) {
        self.header_mut().set_node_type(node_type);
    }

    pub fn keysize(&self) -> usize {
        self.header().keysize() as usize
    }

    pub fn valuesize(&self) -> usize {
        self.header().valuesize() as usize
    }

    pub fn blocksize(&self) -> usize {
        self.data.len()
    }

    pub fn rootnode(&self) -> BlockId {
        self.header().rootnode()
    }

    pub fn set_rootnode(&mut self, block: BlockId) {
        self.header_mut().set_rootnode(block);
    }

    pub fn freelist(&self) -> BlockId {
        self.header().freelist()
    }

    pub fn set_freelist(&mut self, block: BlockId) {
        self.header_mut().set_freelist(block);
    }

    pub fn numkeys(&self) -> usize {
        self.header().numkeys() as usize
    }

    pub fn set_numkeys(&mut self, count: usize) {
        self.header_mut().set_numkeys(count as u64);
    }

    /// Number of `(key, value)` slots a leaf image can physically hold.
    pub fn leaf_slot_capacity(&self) -> usize {
        let width = self.keysize() + self.valuesize();
        if width == 0 {
            return 0;
        }
        (self.data.len() - NODE_HEADER_SIZE) / width
    }

    /// Number of key slots an interior image can physically hold. The
    /// trailing child pointer is reserved before dividing.
    pub fn interior_slot_capacity(&self) -> usize {
        let width = self.keysize() + PTR_SIZE;
        (self.data.len() - NODE_HEADER_SIZE - PTR_SIZE) / width
    }

    fn key_capacity(&self) -> usize {
        match self.node_type() {
            NodeType::Leaf => self.leaf_slot_capacity(),
            NodeType::Root | NodeType::Interior => self.interior_slot_capacity(),
            NodeType::Free | NodeType::Superblock => 0,
        }
    }

    fn leaf_offset(&self, index: usize) -> usize {
        NODE_HEADER_SIZE + index * (self.keysize() + self.valuesize())
    }

    fn ptr_offset(&self, index: usize) -> usize {
        NODE_HEADER_SIZE + index * (PTR_SIZE + self.keysize())
    }

    fn interior_key_offset(&self, index: usize) -> usize {
        self.ptr_offset(index) + PTR_SIZE
    }

    pub fn key_at(&self, index: usize) -> Result<&[u8]> {
        let capacity = self.key_capacity();
        ensure!(
            index < capacity,
            "key slot {} out of range on {:?} node (capacity={})",
            index,
            self.node_type(),
            capacity
        );

        let offset = match self.node_type() {
            NodeType::Leaf => self.leaf_offset(index),
            _ => self.interior_key_offset(index),
        };
        Ok(&self.data[offset..offset + self.keysize()])
    }

    pub fn set_key(&mut self, index: usize, key: &[u8]) -> Result<()> {
        let ks = self.keysize();
        ensure!(key.len() == ks, "key length {} != keysize {}", key.len(), ks);

        let capacity = self.key_capacity();
        ensure!(
            index < capacity,
            "key slot {} out of range on {:?} node (capacity={})",
            index,
            self.node_type(),
            capacity
        );

        let offset = match self.node_type() {
            NodeType::Leaf => self.leaf_offset(index),
            _ => self.interior_key_offset(index),
        };
        self.data[offset..offset + ks].copy_from_slice(key);
        Ok(())
    }

    pub fn value_at(&self, index: usize) -> Result<&[u8]> {
        ensure!(
            self.node_type() == NodeType::Leaf,
            "value slot on {:?} node",
            self.node_type()
        );
        let capacity = self.leaf_slot_capacity();
        ensure!(
            index < capacity,
            "value slot {} out of range (capacity={})",
            index,
            capacity
        );

        let offset = self.leaf_offset(index) + self.keysize();
        Ok(&self.data[offset..offset + self.valuesize()])
    }

    pub fn set_value(&mut self, index: usize, value: &[u8]) -> Result<()> {
        ensure!(
            self.node_type() == NodeType::Leaf,
            "value slot on {:?} node",
            self.node_type()
        );
        let vs = self.valuesize();
        ensure!(
            value.len() == vs,
            "value length {} != valuesize {}",
            value.len(),
            vs
        );
        let capacity = self.leaf_slot_capacity();
        ensure!(
            index < capacity,
            "value slot {} out of range (capacity={})",
            index,
            capacity
        );

        let offset = self.leaf_offset(index) + self.keysize();
        self.data[offset..offset + vs].copy_from_slice(value);
        Ok(())
    }

    pub fn ptr_at(&self, index: usize) -> Result<BlockId> {
        ensure!(
            self.node_type().is_interior_kind(),
            "child pointer on {:?} node",
            self.node_type()
        );
        let capacity = self.interior_slot_capacity();
        ensure!(
            index <= capacity,
            "pointer slot {} out of range (capacity={})",
            index,
            capacity
        );

        let offset = self.ptr_offset(index);
        let bytes: [u8; PTR_SIZE] = self.data[offset..offset + PTR_SIZE]
            .try_into()
            .unwrap(); // INVARIANT: slice length is PTR_SIZE by construction
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn set_ptr(&mut self, index: usize, block: BlockId) -> Result<()> {
        ensure!(
            self.node_type().is_interior_kind(),
            "child pointer on {:?} node",
            self.node_type()
        );
        let capacity = self.interior_slot_capacity();
        ensure!(
            index <= capacity,
            "pointer slot {} out of range (capacity={})",
            index,
            capacity
        );

        let offset = self.ptr_offset(index);
        self.data[offset..offset + PTR_SIZE].copy_from_slice(&block.to_le_bytes());
        Ok(())
    }

    /// First slot whose key is strictly greater than `key`, else `numkeys`.
    ///
    /// This is both the routing rule for descent (equal keys go right) and
    /// the insertion offset for leaves (a duplicate lands after its peers).
    pub fn search_slot(&self, key: &[u8]) -> Result<usize> {
        let n = self.numkeys();
        for i in 0..n {
            if key < self.key_at(i)? {
                return Ok(i);
            }
        }
        Ok(n)
    }

    /// Linear scan of a leaf for an exact key match.
    pub fn leaf_find(&self, key: &[u8]) -> Result<Option<usize>> {
        for i in 0..self.numkeys() {
            if self.key_at(i)? == key {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// Inserts `(key, value)` at `index`, shifting later slots right.
    pub fn leaf_insert_at(&mut self, index: usize, key: &[u8], value: &[u8]) -> Result<()> {
        ensure!(
            self.node_type() == NodeType::Leaf,
            "leaf insert on {:?} node",
            self.node_type()
        );
        let ks = self.keysize();
        let vs = self.valuesize();
        ensure!(key.len() == ks, "key length {} != keysize {}", key.len(), ks);
        ensure!(
            value.len() == vs,
            "value length {} != valuesize {}",
            value.len(),
            vs
        );

        let n = self.numkeys();
        let capacity = self.leaf_slot_capacity();
        ensure!(n < capacity, "leaf full (numkeys={}, capacity={})", n, capacity);
        ensure!(index <= n, "insert index {} out of range (numkeys={})", index, n);

        let width = ks + vs;
        let start = self.leaf_offset(index);
        let end = self.leaf_offset(n);
        self.data.copy_within(start..end, start + width);
        self.data[start..start + ks].copy_from_slice(key);
        self.data[start + ks..start + width].copy_from_slice(value);
        self.set_numkeys(n + 1);
        Ok(())
    }

    /// Inserts separator `key` at `index` with `right_child` as the child
    /// covering keys `>= key`, shifting later key/pointer pairs right.
    pub fn interior_insert_at(
        &mut self,
        index: usize,
        key: &[u8],
        right_child: BlockId,
    ) -> Result<()> {
        ensure!(
            self.node_type().is_interior_kind(),
            "interior insert on {:?} node",
            self.node_type()
        );
        let ks = self.keysize();
        ensure!(key.len() == ks, "key length {} != keysize {}", key.len(), ks);

        let n = self.numkeys();
        let capacity = self.interior_slot_capacity();
        ensure!(
            n < capacity,
            "interior full (numkeys={}, capacity={})",
            n,
            capacity
        );
        ensure!(index <= n, "insert index {} out of range (numkeys={})", index, n);

        // Each (key[i], ptr[i+1]) pair is contiguous; shifting the pairs at
        // >= index right by one opens the slot without touching ptr[index].
        let width = ks + PTR_SIZE;
        let start = self.interior_key_offset(index);
        let end = self.interior_key_offset(n);
        self.data.copy_within(start..end, start + width);
        self.data[start..start + ks].copy_from_slice(key);
        let ptr_off = self.ptr_offset(index + 1);
        self.data[ptr_off..ptr_off + PTR_SIZE].copy_from_slice(&right_child.to_le_bytes());
        self.set_numkeys(n + 1);
        Ok(())
    }

    /// Drops leaf slots at `>= new_numkeys`, re-zeroing the vacated bytes so
    /// the image stays byte-exact.
    pub fn leaf_truncate(&mut self, new_numkeys: usize) -> Result<()> {
        ensure!(
            self.node_type() == NodeType::Leaf,
            "leaf truncate on {:?} node",
            self.node_type()
        );
        let n = self.numkeys();
        ensure!(
            new_numkeys <= n,
            "truncate to {} exceeds numkeys {}",
            new_numkeys,
            n
        );

        let start = self.leaf_offset(new_numkeys);
        let end = self.leaf_offset(n);
        self.data[start..end].fill(0);
        self.set_numkeys(new_numkeys);
        Ok(())
    }

    /// Drops interior keys at `>= new_numkeys` and their right-hand child
    /// pointers, re-zeroing the vacated bytes. `ptr[new_numkeys]` survives
    /// as the new trailing pointer.
    pub fn interior_truncate(&mut self, new_numkeys: usize) -> Result<()> {
        ensure!(
            self.node_type().is_interior_kind(),
            "interior truncate on {:?} node",
            self.node_type()
        );
        let n = self.numkeys();
        ensure!(
            new_numkeys <= n,
            "truncate to {} exceeds numkeys {}",
            new_numkeys,
            n
        );

        let start = self.interior_key_offset(new_numkeys);
        let end = self.interior_key_offset(n);
        self.data[start..end].fill(0);
        self.set_numkeys(new_numkeys);
        Ok(())
    }
}
