//! Trees of fixed-size nodes that store variable-length byte sequences on top of a block store.
//!
//! Leaves hold payload bytes, inner nodes hold the ids of their children. A [DataNodeStore]
//! creates and loads single nodes, a [DataTreeStore] grows and shrinks whole trees.

mod on_blocks;
pub use on_blocks::{
    DataInnerNode, DataLeafNode, DataNode, DataNodeStore, DataTree, DataTreeStore, NodeError,
    NodeLayout, MAX_DEPTH,
};

pub use blocktree_blockstore::RemoveResult;
