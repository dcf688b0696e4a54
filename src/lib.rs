//! # blocktree - Disk-Backed B-Tree Index
//!
//! blocktree is a persistent B-tree index that maps fixed-size byte keys to
//! fixed-size byte values. All persistent state lives in uniformly sized
//! blocks supplied by an external block cache; the index itself never touches
//! a file descriptor. It is the indexing layer a storage manager embeds to
//! answer point lookups, insert and update key/value pairs, and enumerate the
//! index in sorted order.
//!
//! ## Quick Start
//!
//! ```ignore
//! use blocktree::{BTreeIndex, MemoryCache};
//!
//! let mut cache = MemoryCache::new(512, 64);
//! let mut index = BTreeIndex::new(8, 8, &mut cache, false)?;
//!
//! index.attach(0, true)?;
//! index.insert(b"aaaaaaaa", b"00000001")?;
//! assert_eq!(index.lookup(b"aaaaaaaa")?, Some(b"00000001".to_vec()));
//! index.detach()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      Tree Engine (BTreeIndex)        │  attach/detach, lookup, insert,
//! │   descent · split · free list        │  update, display, sanity_check
//! ├─────────────────────────────────────┤
//! │          Node Codec (Node)           │  block image <-> header + slots
//! ├─────────────────────────────────────┤
//! │      Block Cache (BlockCache)        │  read/write fixed-size blocks
//! │   MemoryCache  ·  MmapCache  ·  ...  │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## On-Disk Layout
//!
//! The index occupies `N` blocks of exactly `B` bytes. Block 0 is the
//! superblock and holds the authoritative root pointer, free-list head, and
//! total key count. Every other block is either a tree node (leaf or
//! interior) or a member of the singly linked free list threaded through the
//! block headers. See the [`node`] module for the exact byte layout.
//!
//! ## Split Policy
//!
//! Nodes split *after* insertion once they reach two thirds of their slot
//! capacity, keeping every node strictly below the threshold between calls.
//! The ratio is carried by [`config::FillPolicy`] and defaults to 2/3 for
//! on-disk compatibility.
//!
//! ## What blocktree Is Not
//!
//! - Not concurrent: the engine is single-threaded; callers serialize access.
//! - Not crash-safe: there is no journal. A failure mid-split leaves the
//!   volume in an undefined state.
//! - No deletion: `delete` returns [`IndexError::Unimplemented`]. Variable
//!   length keys or values, compression, and range scans beyond in-order
//!   traversal are out of scope.
//!
//! ## Module Overview
//!
//! - [`cache`]: the `BlockCache` contract plus memory and mmap-backed caches
//! - [`node`]: node types, header layout, and the block-image codec
//! - [`tree`]: the engine (descent, split-on-insert, display, sanity check)
//! - [`config`]: layout constants and the fill policy
//! - [`error`]: the typed error kinds callers branch on

pub mod cache;
pub mod config;
pub mod error;
pub mod node;
pub mod tree;

pub use cache::{BlockCache, BlockId, MemoryCache, MmapCache};
pub use config::FillPolicy;
pub use error::IndexError;
pub use node::{Node, NodeType};
pub use tree::{BTreeIndex, DisplayMode};
