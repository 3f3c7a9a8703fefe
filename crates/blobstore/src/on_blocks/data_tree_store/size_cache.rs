use anyhow::{anyhow, bail, Result};
use async_recursion::async_recursion;
use std::num::NonZeroU64;

use crate::on_blocks::data_node_store::{
    DataInnerNode, DataNode, DataNodeStore, NodeError, NodeLayout,
};
use blocktree_blockstore::{BlockId, BlockStore};

/// Remembers how many leaves (and possibly bytes) a tree has so we don't have to walk
/// down its right border for every size query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeCache {
    SizeUnknown,
    RootIsInnerNodeAndNumLeavesIsKnown {
        num_leaves: NonZeroU64,
        // Only valid while the root is an inner node. If the root were the rightmost leaf,
        // loading it to get its size would wait for the lock we're already holding on the root.
        rightmost_leaf_id: BlockId,
    },
    NumBytesIsKnown {
        num_leaves: NonZeroU64,
        rightmost_leaf_num_bytes: u32,
    },
}

impl SizeCache {
    pub async fn get_or_calculate_num_leaves<B: BlockStore + Send + Sync + 'static>(
        &mut self,
        node_store: &DataNodeStore<B>,
        root_node: &DataNode<B>,
    ) -> Result<NonZeroU64> {
        match (*self, root_node) {
            (Self::SizeUnknown, DataNode::Inner(root_node)) => {
                let NumLeavesAndRightmostLeafId {
                    num_leaves,
                    rightmost_leaf_id,
                } = calculate_num_leaves_and_rightmost_leaf_id(node_store, root_node).await?;
                *self = SizeCache::RootIsInnerNodeAndNumLeavesIsKnown {
                    num_leaves,
                    rightmost_leaf_id,
                };
                Ok(num_leaves)
            }
            (Self::SizeUnknown, DataNode::Leaf(root_node)) => {
                let num_leaves = NonZeroU64::MIN;
                *self = SizeCache::NumBytesIsKnown {
                    num_leaves,
                    rightmost_leaf_num_bytes: root_node.num_bytes(),
                };
                Ok(num_leaves)
            }
            (Self::RootIsInnerNodeAndNumLeavesIsKnown { num_leaves, .. }, _) => Ok(num_leaves),
            (Self::NumBytesIsKnown { num_leaves, .. }, _) => Ok(num_leaves),
        }
    }

    pub async fn get_or_calculate_num_bytes<B: BlockStore + Send + Sync + 'static>(
        &mut self,
        node_store: &DataNodeStore<B>,
        root_node: &DataNode<B>,
    ) -> Result<u64> {
        let layout = *node_store.layout();
        match (*self, root_node) {
            (Self::SizeUnknown, DataNode::Inner(root_node)) => {
                let NumLeavesAndRightmostLeafId {
                    num_leaves,
                    rightmost_leaf_id,
                } = calculate_num_leaves_and_rightmost_leaf_id(node_store, root_node).await?;
                let rightmost_leaf_num_bytes =
                    Self::_calculate_leaf_size(node_store, rightmost_leaf_id).await?;
                *self = Self::NumBytesIsKnown {
                    num_leaves,
                    rightmost_leaf_num_bytes,
                };
                calculate_num_bytes(&layout, num_leaves, rightmost_leaf_num_bytes)
            }
            (Self::SizeUnknown, DataNode::Leaf(root_node)) => {
                let num_leaves = NonZeroU64::MIN;
                let rightmost_leaf_num_bytes = root_node.num_bytes();
                *self = Self::NumBytesIsKnown {
                    num_leaves,
                    rightmost_leaf_num_bytes,
                };
                calculate_num_bytes(&layout, num_leaves, rightmost_leaf_num_bytes)
            }
            (
                Self::RootIsInnerNodeAndNumLeavesIsKnown {
                    num_leaves,
                    rightmost_leaf_id,
                },
                _,
            ) => {
                let rightmost_leaf_num_bytes =
                    Self::_calculate_leaf_size(node_store, rightmost_leaf_id).await?;
                *self = Self::NumBytesIsKnown {
                    num_leaves,
                    rightmost_leaf_num_bytes,
                };
                calculate_num_bytes(&layout, num_leaves, rightmost_leaf_num_bytes)
            }
            (
                Self::NumBytesIsKnown {
                    num_leaves,
                    rightmost_leaf_num_bytes,
                },
                _,
            ) => calculate_num_bytes(&layout, num_leaves, rightmost_leaf_num_bytes),
        }
    }

    pub fn update(
        &mut self,
        layout: &NodeLayout,
        num_leaves: NonZeroU64,
        total_num_bytes: u64,
    ) -> Result<()> {
        let max_bytes_per_leaf = u64::from(layout.max_bytes_per_leaf());
        let num_bytes_in_left_leaves = (num_leaves.get() - 1) * max_bytes_per_leaf;
        let rightmost_leaf_num_bytes = total_num_bytes
            .checked_sub(num_bytes_in_left_leaves)
            .ok_or_else(|| {
                anyhow!(
                    "Tried to update cache to total_num_bytes={} but with max_bytes_per_leaf={} and num_leaves={}, we should have at least {}",
                    total_num_bytes,
                    max_bytes_per_leaf,
                    num_leaves,
                    num_bytes_in_left_leaves,
                )
            })?;
        if rightmost_leaf_num_bytes > max_bytes_per_leaf {
            bail!(
                "Tried to update cache to total_num_bytes={} but {} leaves with max_bytes_per_leaf={} can't hold that",
                total_num_bytes,
                num_leaves,
                max_bytes_per_leaf,
            );
        }
        *self = Self::NumBytesIsKnown {
            num_leaves,
            rightmost_leaf_num_bytes: rightmost_leaf_num_bytes as u32,
        };
        Ok(())
    }

    async fn _calculate_leaf_size<B: BlockStore + Send + Sync + 'static>(
        node_store: &DataNodeStore<B>,
        rightmost_leaf_id: BlockId,
    ) -> Result<u32> {
        match node_store.load(rightmost_leaf_id).await? {
            DataNode::Inner(inner) => bail!(NodeError::corrupt(
                rightmost_leaf_id,
                format!(
                    "Expected the rightmost leaf but found an inner node with depth {}",
                    inner.depth(),
                ),
            )),
            DataNode::Leaf(leaf) => Ok(leaf.num_bytes()),
        }
    }
}

fn calculate_num_bytes(
    layout: &NodeLayout,
    num_leaves: NonZeroU64,
    rightmost_leaf_num_bytes: u32,
) -> Result<u64> {
    (num_leaves.get() - 1)
        .checked_mul(u64::from(layout.max_bytes_per_leaf()))
        .and_then(|left| left.checked_add(u64::from(rightmost_leaf_num_bytes)))
        .ok_or_else(|| {
            anyhow!(
                "Overflow in (num_leaves-1)*max_bytes_per_leaf+rightmost_leaf_num_bytes: ({}-1)*{}+{}",
                num_leaves,
                layout.max_bytes_per_leaf(),
                rightmost_leaf_num_bytes,
            )
        })
}

struct NumLeavesAndRightmostLeafId {
    num_leaves: NonZeroU64,
    rightmost_leaf_id: BlockId,
}

#[async_recursion]
async fn calculate_num_leaves_and_rightmost_leaf_id<B: BlockStore + Send + Sync + 'static>(
    node_store: &DataNodeStore<B>,
    root_node: &DataInnerNode<B>,
) -> Result<NumLeavesAndRightmostLeafId> {
    let depth = root_node.depth().get();
    let num_children = NonZeroU64::from(root_node.num_children());
    let last_child_id = root_node.read_last_child();
    if depth == 1 {
        return Ok(NumLeavesAndRightmostLeafId {
            num_leaves: num_children,
            rightmost_leaf_id: last_child_id,
        });
    }

    let num_leaves_per_full_child = node_store.layout().num_leaves_per_full_subtree(depth - 1)?;
    let num_leaves_in_left_children = (num_children.get() - 1)
        .checked_mul(num_leaves_per_full_child.get())
        .ok_or_else(|| {
            anyhow!(
                "Overflow in (num_children-1)*num_leaves_per_full_child: ({}-1)*{}",
                num_children,
                num_leaves_per_full_child,
            )
        })?;
    let last_child = match node_store.load(last_child_id).await? {
        DataNode::Leaf(_) => bail!(NodeError::corrupt(
            last_child_id,
            format!(
                "Loaded as a leaf node but the inner node above it has depth {}",
                depth
            ),
        )),
        DataNode::Inner(last_child) => last_child,
    };
    let NumLeavesAndRightmostLeafId {
        num_leaves: num_leaves_in_right_child,
        rightmost_leaf_id,
    } = calculate_num_leaves_and_rightmost_leaf_id(node_store, &last_child).await?;
    let num_leaves = num_leaves_in_right_child
        .checked_add(num_leaves_in_left_children)
        .ok_or_else(|| {
            anyhow!(
                "Overflow in num_leaves_in_right_child+num_leaves_in_left_children: {}+{}",
                num_leaves_in_right_child,
                num_leaves_in_left_children,
            )
        })?;
    Ok(NumLeavesAndRightmostLeafId {
        num_leaves,
        rightmost_leaf_id,
    })
}
