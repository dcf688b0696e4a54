//! # Node Codec
//!
//! A node is the logical view of one block: a fixed 40-byte header followed
//! by a packed slot payload whose shape depends on the node's kind.
//!
//! ## Block Layouts
//!
//! ```text
//! SUPERBLOCK (block 0)
//! +----------------------+
//! | NodeHeader (40B)     |  rootnode, free-list head, total numkeys
//! +----------------------+
//! | zeros                |
//! +----------------------+
//!
//! LEAF
//! +----------------------+
//! | NodeHeader (40B)     |  numkeys = live slots
//! +----------------------+
//! | key0 val0            |  ascending key order,
//! | key1 val1            |  keysize + valuesize bytes per slot
//! | ...                  |
//! +----------------------+
//! | zeros                |  vacated slots are re-zeroed
//! +----------------------+
//!
//! INTERIOR / ROOT
//! +----------------------+
//! | NodeHeader (40B)     |
//! +----------------------+
//! | ptr0 key0            |  numkeys keys, numkeys + 1 child pointers;
//! | ptr1 key1            |  ptr[i] covers keys < key[i], the trailing
//! | ...                  |  pointer covers keys >= key[numkeys-1]
//! | ptrN                 |
//! +----------------------+
//! | zeros                |
//! +----------------------+
//!
//! FREE
//! +----------------------+
//! | NodeHeader (40B)     |  freelist = next free block, 0 = end
//! +----------------------+
//! | zeros                |
//! +----------------------+
//! ```
//!
//! The key, value, and block widths are stamped redundantly into every
//! header; the superblock's copies are authoritative. All multi-byte fields
//! are little-endian (`zerocopy` wrapper types), and unused payload bytes
//! are kept zero so that identical logical content always produces an
//! identical block image.

mod codec;
mod header;

pub use codec::Node;
pub use header::{NodeHeader, NodeType, NODE_HEADER_SIZE};
