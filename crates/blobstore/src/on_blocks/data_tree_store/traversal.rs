use anyhow::{bail, Result};
use async_recursion::async_recursion;
use divrem::DivCeil;
use futures::future;

use crate::on_blocks::data_node_store::{
    DataInnerNode, DataLeafNode, DataNode, DataNodeStore, NodeError,
};
use blocktree_blockstore::{BlockId, BlockStore, RemoveResult};

/// Load a child node and check that it sits at the depth its parent expects.
pub async fn load_child<B: BlockStore + Send + Sync + 'static>(
    node_store: &DataNodeStore<B>,
    child_id: BlockId,
    expected_depth: u8,
) -> Result<DataNode<B>> {
    let child = node_store.load(child_id).await?;
    if child.depth() != expected_depth {
        bail!(NodeError::corrupt(
            child_id,
            format!(
                "Expected a child of depth {} but it has depth {}",
                expected_depth,
                child.depth()
            ),
        ));
    }
    Ok(child)
}

/// Calls `callback` for each leaf in `begin_leaf..end_leaf` of the subtree below `node`, left to right.
/// Leaf indices are relative to `node`; the callback gets `first_leaf_index + index`.
#[async_recursion]
pub async fn traverse_leaves<B: BlockStore + Send + Sync + 'static>(
    node_store: &DataNodeStore<B>,
    node: &mut DataNode<B>,
    first_leaf_index: u64,
    begin_leaf: u64,
    end_leaf: u64,
    callback: &mut (dyn FnMut(u64, &mut DataLeafNode<B>) -> Result<()> + Send),
) -> Result<()> {
    if end_leaf <= begin_leaf {
        return Ok(());
    }
    match node {
        DataNode::Leaf(leaf) => {
            assert!(
                begin_leaf == 0 && end_leaf == 1,
                "A leaf only has leaf index 0 but we tried to traverse {}..{}",
                begin_leaf,
                end_leaf,
            );
            callback(first_leaf_index, leaf)
        }
        DataNode::Inner(inner) => {
            let depth = inner.depth().get();
            let leaves_per_child = node_store
                .layout()
                .num_leaves_per_full_subtree(depth - 1)?
                .get();
            let begin_child = begin_leaf / leaves_per_child;
            let end_child = DivCeil::div_ceil(end_leaf, leaves_per_child);
            let num_children = u64::from(inner.num_children().get());
            if end_child > num_children {
                bail!(NodeError::invariant_violation(format!(
                    "Tried to traverse child {} of inner node {:?} but it only has {} children",
                    end_child - 1,
                    inner.block_id(),
                    num_children,
                )));
            }
            for child_index in begin_child..end_child {
                let child_id = inner.read_child(child_index as u32)?;
                let mut child = load_child(node_store, child_id, depth - 1).await?;
                let child_first_leaf = child_index * leaves_per_child;
                let child_begin = begin_leaf.saturating_sub(child_first_leaf);
                let child_end = (end_leaf - child_first_leaf).min(leaves_per_child);
                traverse_leaves(
                    node_store,
                    &mut child,
                    first_leaf_index + child_first_leaf,
                    child_begin,
                    child_end,
                    callback,
                )
                .await?;
            }
            Ok(())
        }
    }
}

/// Create a new subtree of the given depth holding `num_leaves` full zero leaves.
/// Children are created before the nodes pointing to them.
#[async_recursion]
pub async fn create_subtree<B: BlockStore + Send + Sync + 'static>(
    node_store: &DataNodeStore<B>,
    depth: u8,
    num_leaves: u64,
) -> Result<DataNode<B>> {
    assert!(num_leaves >= 1, "A subtree needs at least one leaf");
    let layout = *node_store.layout();
    if depth == 0 {
        assert_eq!(1, num_leaves, "A leaf subtree has exactly one leaf");
        let zeroes = vec![0; layout.max_bytes_per_leaf() as usize];
        return Ok(node_store.create_new_leaf_node(&zeroes).await?.upcast());
    }

    let leaves_per_child = layout.num_leaves_per_full_subtree(depth - 1)?.get();
    let mut children = Vec::new();
    let mut remaining = num_leaves;
    while remaining > 0 {
        let leaves_in_child = remaining.min(leaves_per_child);
        let child = create_subtree(node_store, depth - 1, leaves_in_child).await?;
        children.push(*child.block_id());
        remaining -= leaves_in_child;
    }
    Ok(node_store
        .create_new_inner_node(depth, &children)
        .await?
        .upcast())
}

/// Grow the subtree below `node` from `num_leaves_before` to `num_leaves_after` full zero leaves by
/// filling up its right border. `num_leaves_after` must fit below `node`.
#[async_recursion]
pub async fn grow_subtree<B: BlockStore + Send + Sync + 'static>(
    node_store: &DataNodeStore<B>,
    node: &mut DataInnerNode<B>,
    num_leaves_before: u64,
    num_leaves_after: u64,
) -> Result<()> {
    let depth = node.depth().get();
    let leaves_per_child = node_store
        .layout()
        .num_leaves_per_full_subtree(depth - 1)?
        .get();
    let num_children = u64::from(node.num_children().get());
    let leaves_in_left_children = (num_children - 1) * leaves_per_child;
    let leaves_in_last_child = num_leaves_before - leaves_in_left_children;

    let mut num_leaves = num_leaves_before;
    if leaves_in_last_child < leaves_per_child && num_leaves_after > num_leaves {
        // Children at depth 0 are single leaves and always full, so we only get here for depth >= 2
        let target_in_last_child =
            leaves_per_child.min(num_leaves_after - leaves_in_left_children);
        let last_child_id = node.read_last_child();
        let DataNode::Inner(mut last_child) =
            load_child(node_store, last_child_id, depth - 1).await?
        else {
            bail!(NodeError::corrupt(
                last_child_id,
                "Expected an inner node but found a leaf"
            ));
        };
        grow_subtree(
            node_store,
            &mut last_child,
            leaves_in_last_child,
            target_in_last_child,
        )
        .await?;
        num_leaves = leaves_in_left_children + target_in_last_child;
    }

    while num_leaves < num_leaves_after {
        let leaves_in_child = leaves_per_child.min(num_leaves_after - num_leaves);
        let child = create_subtree(node_store, depth - 1, leaves_in_child).await?;
        node.add_child(&child)?;
        num_leaves += leaves_in_child;
    }
    Ok(())
}

/// Cut the subtree below `node` down to its leftmost `num_leaves_after` leaves, removing
/// whole subtrees along its right border. Never removes `node` itself.
#[async_recursion]
pub async fn shrink_subtree<B: BlockStore + Send + Sync + 'static>(
    node_store: &DataNodeStore<B>,
    node: &mut DataInnerNode<B>,
    num_leaves_after: u64,
) -> Result<()> {
    assert!(num_leaves_after >= 1, "A subtree needs at least one leaf");
    let depth = node.depth().get();
    let leaves_per_child = node_store
        .layout()
        .num_leaves_per_full_subtree(depth - 1)?
        .get();
    let needed_children = DivCeil::div_ceil(num_leaves_after, leaves_per_child);

    let mut removed_children = Vec::new();
    while u64::from(node.num_children().get()) > needed_children {
        removed_children.push(node.remove_last_child()?);
    }
    future::try_join_all(
        removed_children
            .into_iter()
            .map(|child_id| remove_subtree_by_root_id(node_store, depth - 1, child_id)),
    )
    .await?;

    if depth > 1 {
        let leaves_in_last_child = num_leaves_after - (needed_children - 1) * leaves_per_child;
        let last_child_id = node.read_last_child();
        let DataNode::Inner(mut last_child) =
            load_child(node_store, last_child_id, depth - 1).await?
        else {
            bail!(NodeError::corrupt(
                last_child_id,
                "Expected an inner node but found a leaf"
            ));
        };
        shrink_subtree(node_store, &mut last_child, leaves_in_last_child).await?;
    }
    Ok(())
}

pub async fn remove_subtree<B: BlockStore + Send + Sync + 'static>(
    node_store: &DataNodeStore<B>,
    root: DataNode<B>,
) -> Result<()> {
    match root {
        DataNode::Leaf(_) => root.remove(node_store).await,
        DataNode::Inner(root) => remove_subtree_of_inner_node(node_store, root).await,
    }
}

async fn remove_subtree_of_inner_node<B: BlockStore + Send + Sync + 'static>(
    node_store: &DataNodeStore<B>,
    root: DataInnerNode<B>,
) -> Result<()> {
    // Remove the node itself first, then its children.
    let children: Vec<_> = root.children().collect();
    let depth = root.depth().get();
    root.upcast().remove(node_store).await?;
    future::try_join_all(
        children
            .into_iter()
            .map(|child_id| remove_subtree_by_root_id(node_store, depth - 1, child_id)),
    )
    .await?;
    Ok(())
}

/// Remove the subtree below `block_id`. Nodes that are already gone are logged and skipped.
#[async_recursion]
pub async fn remove_subtree_by_root_id<B: BlockStore + Send + Sync + 'static>(
    node_store: &DataNodeStore<B>,
    depth: u8,
    block_id: BlockId,
) -> Result<()> {
    if depth == 0 {
        // Leaves can be removed without loading them
        if node_store.remove_by_id(&block_id).await? == RemoveResult::NotRemovedBecauseItDoesntExist
        {
            log::warn!("Tried to remove leaf {:?} but didn't find it", block_id);
        }
        return Ok(());
    }
    match node_store.try_load(block_id).await? {
        None => {
            log::warn!(
                "Tried to remove inner node {:?} at depth {} but didn't find it",
                block_id,
                depth
            );
            Ok(())
        }
        Some(DataNode::Inner(node)) if node.depth().get() == depth => {
            remove_subtree_of_inner_node(node_store, node).await
        }
        Some(node) => bail!(NodeError::corrupt(
            block_id,
            format!(
                "Expected a node of depth {} for removal but it has depth {}",
                depth,
                node.depth()
            ),
        )),
    }
}

/// Ids of all nodes below `node`, including `node` itself, in depth first order.
#[async_recursion]
pub async fn all_blocks_in_subtree<B: BlockStore + Send + Sync + 'static>(
    node_store: &DataNodeStore<B>,
    node: &DataNode<B>,
    result: &mut Vec<BlockId>,
) -> Result<()> {
    result.push(*node.block_id());
    if let DataNode::Inner(inner) = node {
        let depth = inner.depth().get();
        let children: Vec<BlockId> = inner.children().collect();
        for child_id in children {
            let child = load_child(node_store, child_id, depth - 1).await?;
            all_blocks_in_subtree(node_store, &child, result).await?;
        }
    }
    Ok(())
}
