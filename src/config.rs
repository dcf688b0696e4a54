//! # Layout Constants and Fill Policy
//!
//! This module centralizes the constants that define the on-disk block
//! layout. Constants that depend on each other are co-located so a change to
//! one is visible next to the values it constrains.
//!
//! ## Dependency Graph
//!
//! ```text
//! NODE_HEADER_SIZE (40 bytes)
//!       │
//!       ├─> leaf slot capacity    = (B - 40) / (keysize + valuesize)
//!       │
//!       └─> interior slot capacity = (B - 40 - PTR_SIZE) / (keysize + PTR_SIZE)
//!             Interior nodes carry one more child pointer than keys, so one
//!             pointer is reserved before dividing the remaining space.
//!
//! PTR_SIZE (8 bytes)
//!       │
//!       └─> Child pointers are u64 block ids. Block 0 is the superblock and
//!           doubles as the free-list terminator, so 0 is never a child.
//!
//! FillPolicy (default 2/3)
//!       │
//!       └─> A node is "too full" at numkeys >= capacity * 2 / 3 and splits
//!           after the insert that reaches the threshold. Every node
//!           therefore keeps spare physical slots; inserting into a node at
//!           threshold - 1 cannot overflow the block.
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `FillPolicy::threshold(cap) < cap` for every capacity the engine
//!    accepts, so a post-insert node always fits its block.
//! 2. The leaf threshold must be at least 2 and the interior threshold at
//!    least 3, or splits would produce empty halves. `BTreeIndex::new`
//!    rejects block sizes that violate this.

use crate::node::NODE_HEADER_SIZE;

/// Width of a child block pointer in interior nodes, in bytes.
pub const PTR_SIZE: usize = 8;

/// Smallest block size the engine accepts: a header plus one interior slot.
pub const MIN_BLOCK_SIZE: usize = NODE_HEADER_SIZE + 2 * PTR_SIZE;

/// Split threshold as a ratio of slot capacity.
///
/// The default is 2/3: a node is too full once `numkeys` reaches
/// `capacity * 2 / 3`, and splits happen after the insert that gets it
/// there. The ratio is parameterized for testing; persistent volumes must
/// use the default for compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillPolicy {
    numerator: u64,
    denominator: u64,
}

impl FillPolicy {
    pub fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Slot count at which a node of the given capacity is too full.
    pub fn threshold(&self, capacity: usize) -> usize {
        (capacity as u64 * self.numerator / self.denominator) as usize
    }
}

impl Default for FillPolicy {
    fn default() -> Self {
        Self {
            numerator: 2,
            denominator: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fill_policy_is_two_thirds() {
        let policy = FillPolicy::default();

        assert_eq!(policy.threshold(29), 19);
        assert_eq!(policy.threshold(3), 2);
        assert_eq!(policy.threshold(0), 0);
    }

    #[test]
    fn threshold_is_strictly_below_capacity() {
        let policy = FillPolicy::default();

        for capacity in 1..1000 {
            assert!(policy.threshold(capacity) < capacity);
        }
    }

    #[test]
    fn custom_ratio_half() {
        let policy = FillPolicy::new(1, 2);

        assert_eq!(policy.threshold(29), 14);
        assert_eq!(policy.threshold(8), 4);
    }
}
