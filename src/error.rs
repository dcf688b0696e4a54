//! # Typed Error Kinds
//!
//! Most failures in this crate are structural or I/O problems reported as
//! `eyre` errors with formatted context: corrupt node types, codec indexes
//! out of range, cache read/write failures. Those abort the operation and
//! carry enough detail for a human.
//!
//! A handful of outcomes are part of the engine's contract and callers
//! branch on them programmatically: the free list running dry, a duplicate
//! key hitting a unique index, an update to an absent key, and the
//! unimplemented delete. Those are [`IndexError`] values, surfaced through
//! `eyre::Report` so they can be recovered with `downcast_ref`:
//!
//! ```ignore
//! match index.insert(key, value) {
//!     Err(e) if e.downcast_ref::<IndexError>() == Some(&IndexError::NoSpace) => {
//!         // volume full; earlier inserts are still intact
//!     }
//!     other => other?,
//! }
//! ```

use thiserror::Error;

/// Error kinds the engine's callers distinguish programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IndexError {
    /// The free list is empty; no block can be allocated.
    #[error("no space: free list is empty")]
    NoSpace,

    /// The key is not present in the index.
    #[error("key does not exist")]
    KeyNotFound,

    /// Insert of an already-present key into a unique index.
    #[error("key already exists in unique index")]
    KeyExists,

    /// The operation is declared but not implemented.
    #[error("operation not implemented")]
    Unimplemented,
}
