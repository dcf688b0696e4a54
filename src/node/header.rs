//! Node types and the block header layout.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::cache::BlockId;

/// Size of the header at the start of every block.
pub const NODE_HEADER_SIZE: usize = 40;

/// Role a block plays in the volume.
///
/// A freshly formatted root carries `Root` with zero keys; the first insert
/// rewrites it as `Leaf`. From then on the root is `Root` exactly when it
/// has children, and `superblock.rootnode` is the only authoritative way to
/// find it.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Free = 0x00,
    Superblock = 0x01,
    Root = 0x02,
    Interior = 0x03,
    Leaf = 0x04,
}

impl NodeType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(NodeType::Free),
            0x01 => Some(NodeType::Superblock),
            0x02 => Some(NodeType::Root),
            0x03 => Some(NodeType::Interior),
            0x04 => Some(NodeType::Leaf),
            _ => None,
        }
    }

    /// True for nodes laid out as interior nodes (keys + child pointers).
    pub fn is_interior_kind(&self) -> bool {
        matches!(self, NodeType::Root | NodeType::Interior)
    }
}

/// Header at offset 0 of every block, little-endian.
///
/// ```text
/// Offset  Size  Field      Description
/// ------  ----  ---------  -----------------------------------------
/// 0       1     node_type  NodeType discriminant
/// 1       3     reserved   zero
/// 4       4     keysize    redundant copy of superblock keysize
/// 8       4     valuesize  redundant copy of superblock valuesize
/// 12      4     blocksize  redundant copy of the cache block size
/// 16      8     rootnode   authoritative only in the superblock
/// 24      8     freelist   superblock: head; free node: next; else 0
/// 32      8     numkeys    live keys in this node; superblock: total
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct NodeHeader {
    node_type: u8,
    reserved: [u8; 3],
    keysize: U32,
    valuesize: U32,
    blocksize: U32,
    rootnode: U64,
    freelist: U64,
    numkeys: U64,
}

const _: () = assert!(std::mem::size_of::<NodeHeader>() == NODE_HEADER_SIZE);

impl NodeHeader {
    pub fn new(node_type: NodeType, keysize: u32, valuesize: u32, blocksize: u32) -> Self {
        Self {
            node_type: node_type as u8,
            reserved: [0; 3],
            keysize: U32::new(keysize),
            valuesize: U32::new(valuesize),
            blocksize: U32::new(blocksize),
            rootnode: U64::new(0),
            freelist: U64::new(0),
            numkeys: U64::new(0),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= NODE_HEADER_SIZE,
            "buffer too small for NodeHeader: {} < {}",
            data.len(),
            NODE_HEADER_SIZE
        );

        Self::ref_from_bytes(&data[..NODE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read NodeHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= NODE_HEADER_SIZE,
            "buffer too small for NodeHeader: {} < {}",
            data.len(),
            NODE_HEADER_SIZE
        );

        Self::mut_from_bytes(&mut data[..NODE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read NodeHeader: {:?}", e))
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        ensure!(
            data.len() >= NODE_HEADER_SIZE,
            "buffer too small for NodeHeader: {} < {}",
            data.len(),
            NODE_HEADER_SIZE
        );

        data[..NODE_HEADER_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn node_type_byte(&self) -> u8 {
        self.node_type
    }

    pub fn node_type(&self) -> Option<NodeType> {
        NodeType::from_byte(self.node_type)
    }

    pub fn set_node_type(&mut self, node_type: NodeType) {
        self.node_type = node_type as u8;
    }

    pub fn keysize(&self) -> u32 {
        self.keysize.get()
    }

    pub fn valuesize(&self) -> u32 {
        self.valuesize.get()
    }

    pub fn blocksize(&self) -> u32 {
        self.blocksize.get()
    }

    pub fn rootnode(&self) -> BlockId {
        self.rootnode.get()
    }

    pub fn set_rootnode(&mut self, block: BlockId) {
        self.rootnode = U64::new(block);
    }

    pub fn freelist(&self) -> BlockId {
        self.freelist.get()
    }

    pub fn set_freelist(&mut self, block: BlockId) {
        self.freelist = U64::new(block);
    }

    pub fn numkeys(&self) -> u64 {
        self.numkeys.get()
    }

    pub fn set_numkeys(&mut self, count: u64) {
        self.numkeys = U64::new(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_header_size_is_40_bytes() {
        assert_eq!(std::mem::size_of::<NodeHeader>(), 40);
    }

    #[test]
    fn node_type_from_byte() {
        assert_eq!(NodeType::from_byte(0x00), Some(NodeType::Free));
        assert_eq!(NodeType::from_byte(0x01), Some(NodeType::Superblock));
        assert_eq!(NodeType::from_byte(0x02), Some(NodeType::Root));
        assert_eq!(NodeType::from_byte(0x03), Some(NodeType::Interior));
        assert_eq!(NodeType::from_byte(0x04), Some(NodeType::Leaf));
        assert_eq!(NodeType::from_byte(0x05), None);
        assert_eq!(NodeType::from_byte(0xFF), None);
    }

    #[test]
    fn interior_kinds() {
        assert!(NodeType::Root.is_interior_kind());
        assert!(NodeType::Interior.is_interior_kind());
        assert!(!NodeType::Leaf.is_interior_kind());
        assert!(!NodeType::Free.is_interior_kind());
        assert!(!NodeType::Superblock.is_interior_kind());
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let mut header = NodeHeader::new(NodeType::Superblock, 8, 16, 512);
        header.set_rootnode(1);
        header.set_freelist(2);
        header.set_numkeys(42);

        let bytes = header.as_bytes().to_vec();
        let parsed = NodeHeader::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.node_type(), Some(NodeType::Superblock));
        assert_eq!(parsed.keysize(), 8);
        assert_eq!(parsed.valuesize(), 16);
        assert_eq!(parsed.blocksize(), 512);
        assert_eq!(parsed.rootnode(), 1);
        assert_eq!(parsed.freelist(), 2);
        assert_eq!(parsed.numkeys(), 42);
    }

    #[test]
    fn header_fields_are_little_endian_at_fixed_offsets() {
        let mut header = NodeHeader::new(NodeType::Leaf, 8, 8, 512);
        header.set_numkeys(7);

        let bytes = header.as_bytes();

        assert_eq!(bytes[0], 0x04);
        assert_eq!(&bytes[1..4], &[0, 0, 0]);
        assert_eq!(&bytes[4..8], &8u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &512u32.to_le_bytes());
        assert_eq!(&bytes[32..40], &7u64.to_le_bytes());
    }

    #[test]
    fn from_bytes_too_small_fails() {
        let data = [0u8; 16];

        let result = NodeHeader::from_bytes(&data);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("buffer too small"));
    }

    #[test]
    fn from_bytes_mut_modifies_in_place() {
        let mut data = [0u8; NODE_HEADER_SIZE];

        {
            let header = NodeHeader::from_bytes_mut(&mut data).unwrap();
            header.set_node_type(NodeType::Interior);
            header.set_numkeys(3);
        }

        assert_eq!(data[0], 0x03);
        assert_eq!(&data[32..40], &3u64.to_le_bytes());
    }
}
