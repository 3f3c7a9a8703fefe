use anyhow::{anyhow, Result};
use binary_layout::{define_layout, Field};
use std::num::NonZeroU64;

use blocktree_blockstore::BLOCKID_LEN;

pub const FORMAT_VERSION_HEADER: u16 = 0;

/// Cap on tree depth in the on-disk format. Loading a deeper node fails as corrupt, and
/// trees that would need more levels fail with [crate::NodeError::CapacityExceeded]. How much
/// data fits below this depth depends on the block size, e.g. only 32 KiB with 40 byte blocks.
pub const MAX_DEPTH: u8 = 10;

define_layout!(node, LittleEndian, {
    format_version_header: u16,

    // Not currently used, only used for alignment.
    unused: u8,

    // Leaf nodes have a depth of 0. Each layer above has a depth of one higher than the level directly below.
    depth: u8,

    // Leaf nodes store number of data bytes here. Inner nodes store number of children.
    size: u32,

    // Data. Leaf nodes just store bytes here. Inner nodes store a list of child block ids.
    data: [u8],
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    pub block_size_bytes: u32,
}

impl NodeLayout {
    pub const fn header_len() -> usize {
        node::data::OFFSET
    }

    /// Enough for the header and for inner nodes to have at least two children and form a tree.
    pub const fn min_block_size_bytes() -> usize {
        node::data::OFFSET + 2 * BLOCKID_LEN
    }

    pub fn max_bytes_per_leaf(&self) -> u32 {
        self.block_size_bytes - Self::header_len() as u32
    }

    pub fn max_children_per_inner_node(&self) -> u32 {
        self.max_bytes_per_leaf() / BLOCKID_LEN as u32
    }

    /// Number of leaves below a full inner node of the given depth. A leaf itself (depth 0) counts as 1.
    pub fn num_leaves_per_full_subtree(&self, depth: u8) -> Result<NonZeroU64> {
        let num_leaves = u64::from(self.max_children_per_inner_node())
            .checked_pow(u32::from(depth))
            .ok_or_else(|| {
                anyhow!(
                    "Overflow in max_children_per_inner_node^depth: {}^{}",
                    self.max_children_per_inner_node(),
                    depth,
                )
            })?;
        Ok(NonZeroU64::new(num_leaves).expect("non_zero^x can never be zero"))
    }

    /// Number of bytes a tree with a root of the given depth can hold.
    pub fn max_bytes_per_subtree(&self, depth: u8) -> Result<u64> {
        self.num_leaves_per_full_subtree(depth)?
            .get()
            .checked_mul(u64::from(self.max_bytes_per_leaf()))
            .ok_or_else(|| anyhow!("Overflow computing the capacity of a tree of depth {}", depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: NodeLayout = NodeLayout {
        block_size_bytes: 1024,
    };

    #[test]
    fn header_is_8_bytes() {
        assert_eq!(8, NodeLayout::header_len());
        assert_eq!(40, NodeLayout::min_block_size_bytes());
    }

    #[test]
    fn max_bytes_per_leaf() {
        assert_eq!(1016, LAYOUT.max_bytes_per_leaf());
    }

    #[test]
    fn max_children_per_inner_node() {
        assert_eq!(63, LAYOUT.max_children_per_inner_node());
        assert_eq!(
            2,
            NodeLayout {
                block_size_bytes: 40
            }
            .max_children_per_inner_node()
        );
    }

    #[test]
    fn num_leaves_per_full_subtree() {
        assert_eq!(1, LAYOUT.num_leaves_per_full_subtree(0).unwrap().get());
        assert_eq!(63, LAYOUT.num_leaves_per_full_subtree(1).unwrap().get());
        assert_eq!(63 * 63, LAYOUT.num_leaves_per_full_subtree(2).unwrap().get());
    }

    #[test]
    fn num_leaves_per_full_subtree_overflow() {
        let layout = NodeLayout {
            block_size_bytes: u32::MAX,
        };
        assert!(layout.num_leaves_per_full_subtree(10).is_err());
    }

    #[test]
    fn max_bytes_per_subtree() {
        assert_eq!(1016, LAYOUT.max_bytes_per_subtree(0).unwrap());
        assert_eq!(63 * 1016, LAYOUT.max_bytes_per_subtree(1).unwrap());
    }
}
