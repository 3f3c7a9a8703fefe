use anyhow::{anyhow, bail, Result};
use divrem::DivCeil;
use std::fmt::{self, Debug};
use std::num::NonZeroU64;

use super::size_cache::SizeCache;
use super::traversal;
use crate::on_blocks::data_node_store::{
    DataLeafNode, DataNode, DataNodeStore, NodeError, NodeLayout, MAX_DEPTH,
};
use blocktree_blockstore::{BlockId, BlockStore};
use blocktree_utils::data::Data;

/// A tree of nodes storing a byte sequence in its leaves, left to right.
///
/// Holding the root node keeps it locked in the block store, so there can only ever be
/// one [DataTree] instance for a given tree.
pub struct DataTree<'a, B: BlockStore + Send + Sync + 'static> {
    // Always Some except in the middle of replacing the root
    root_node: Option<DataNode<B>>,
    node_store: &'a DataNodeStore<B>,
    num_bytes_cache: SizeCache,
}

impl<'a, B: BlockStore + Send + Sync + 'static> DataTree<'a, B> {
    pub fn new(root_node: DataNode<B>, node_store: &'a DataNodeStore<B>) -> Self {
        Self {
            root_node: Some(root_node),
            node_store,
            num_bytes_cache: SizeCache::SizeUnknown,
        }
    }

    fn _root(&self) -> &DataNode<B> {
        self.root_node.as_ref().expect("root_node is None")
    }

    pub fn root_node_id(&self) -> &BlockId {
        self._root().block_id()
    }

    pub fn depth(&self) -> u8 {
        self._root().depth()
    }

    pub async fn num_bytes(&mut self) -> Result<u64> {
        let root_node = self.root_node.as_ref().expect("root_node is None");
        self.num_bytes_cache
            .get_or_calculate_num_bytes(self.node_store, root_node)
            .await
    }

    pub async fn num_leaves(&mut self) -> Result<NonZeroU64> {
        let root_node = self.root_node.as_ref().expect("root_node is None");
        self.num_bytes_cache
            .get_or_calculate_num_leaves(self.node_store, root_node)
            .await
    }

    /// Every level of a tree is filled from the left, so the number of nodes follows from the number of leaves.
    pub async fn num_nodes(&mut self) -> Result<u64> {
        let mut num_nodes_current_level = self.num_leaves().await?.get();
        let mut total_num_nodes = num_nodes_current_level;
        for _level in 0..self.depth() {
            num_nodes_current_level = DivCeil::div_ceil(
                num_nodes_current_level,
                u64::from(self.node_store.layout().max_children_per_inner_node()),
            );
            total_num_nodes += num_nodes_current_level;
        }
        Ok(total_num_nodes)
    }

    pub async fn read_bytes(&mut self, offset: u64, target: &mut [u8]) -> Result<()> {
        let num_bytes = self.num_bytes().await?;
        let read_end = offset.checked_add(target.len() as u64).ok_or_else(|| {
            anyhow!(
                "Overflow in offset+target.len(): {}+{}",
                offset,
                target.len()
            )
        })?;
        if read_end > num_bytes {
            bail!(NodeError::OutOfBounds {
                index: read_end,
                len: num_bytes,
            });
        }
        self._do_read_bytes(offset, target).await
    }

    /// Like [DataTree::read_bytes] but reading past the end is allowed and returns how many bytes were actually read.
    pub async fn try_read_bytes(&mut self, offset: u64, target: &mut [u8]) -> Result<usize> {
        let num_bytes = self.num_bytes().await?;
        let real_target_len = target
            .len()
            .min(usize::try_from(num_bytes.saturating_sub(offset)).unwrap_or(usize::MAX));
        self._do_read_bytes(offset, &mut target[..real_target_len])
            .await?;
        Ok(real_target_len)
    }

    pub async fn read_all(&mut self) -> Result<Data> {
        let num_bytes = self.num_bytes().await?;
        let num_bytes = usize::try_from(num_bytes)
            .map_err(|_| anyhow!("Tree has {} bytes, that doesn't fit into memory", num_bytes))?;
        let mut result = Data::from(vec![0; num_bytes]);
        self._do_read_bytes(0, &mut result).await?;
        Ok(result)
    }

    async fn _do_read_bytes(&mut self, offset: u64, target: &mut [u8]) -> Result<()> {
        if target.is_empty() {
            return Ok(());
        }
        let max_bytes_per_leaf = u64::from(self.node_store.layout().max_bytes_per_leaf());
        let end = offset + target.len() as u64;
        let mut callback = |leaf_index: u64, leaf: &mut DataLeafNode<B>| -> Result<()> {
            let leaf_begin = leaf_index * max_bytes_per_leaf;
            let begin_in_leaf = offset.saturating_sub(leaf_begin);
            let end_in_leaf = (end - leaf_begin).min(max_bytes_per_leaf);
            let source = leaf.read(begin_in_leaf as u32, (end_in_leaf - begin_in_leaf) as u32)?;
            let target_begin = (leaf_begin + begin_in_leaf - offset) as usize;
            target[target_begin..target_begin + source.len()].copy_from_slice(source);
            Ok(())
        };
        self._traverse_leaves(
            offset / max_bytes_per_leaf,
            DivCeil::div_ceil(end, max_bytes_per_leaf),
            &mut callback,
        )
        .await
    }

    /// Writing past the end grows the tree first. Any gap between the old end and `offset` reads as zeroes.
    pub async fn write_bytes(&mut self, source: &[u8], offset: u64) -> Result<()> {
        if source.is_empty() {
            return Ok(());
        }
        let end = offset.checked_add(source.len() as u64).ok_or_else(|| {
            anyhow!(
                "Overflow in offset+source.len(): {}+{}",
                offset,
                source.len()
            )
        })?;
        if end > self.num_bytes().await? {
            self.resize_num_bytes(end).await?;
        }

        let max_bytes_per_leaf = u64::from(self.node_store.layout().max_bytes_per_leaf());
        let mut callback = |leaf_index: u64, leaf: &mut DataLeafNode<B>| -> Result<()> {
            let leaf_begin = leaf_index * max_bytes_per_leaf;
            let begin_in_leaf = offset.saturating_sub(leaf_begin);
            let end_in_leaf = (end - leaf_begin).min(max_bytes_per_leaf);
            let source_begin = (leaf_begin + begin_in_leaf - offset) as usize;
            let source_end = source_begin + (end_in_leaf - begin_in_leaf) as usize;
            leaf.write(begin_in_leaf as u32, &source[source_begin..source_end])
        };
        self._traverse_leaves(
            offset / max_bytes_per_leaf,
            DivCeil::div_ceil(end, max_bytes_per_leaf),
            &mut callback,
        )
        .await
    }

    /// Grow or shrink the tree so it stores exactly `new_num_bytes` bytes. New bytes are zero.
    pub async fn resize_num_bytes(&mut self, new_num_bytes: u64) -> Result<()> {
        let layout = *self.node_store.layout();
        let max_bytes_per_leaf = u64::from(layout.max_bytes_per_leaf());
        let new_num_leaves = NonZeroU64::new(DivCeil::div_ceil(new_num_bytes, max_bytes_per_leaf))
            .unwrap_or(NonZeroU64::MIN);
        let new_last_leaf_num_bytes =
            (new_num_bytes - (new_num_leaves.get() - 1) * max_bytes_per_leaf) as u32;
        let new_depth = required_depth(&layout, new_num_leaves.get(), new_num_bytes)?;

        let old_num_leaves = self.num_leaves().await?.get();
        // Don't trust the cache until we're done
        self.num_bytes_cache = SizeCache::SizeUnknown;

        if new_num_leaves.get() > old_num_leaves {
            self._grow(old_num_leaves, new_num_leaves.get(), new_depth)
                .await?;
        } else if new_num_leaves.get() < old_num_leaves {
            self._shrink(new_num_leaves.get()).await?;
        }

        let last_leaf_index = new_num_leaves.get() - 1;
        let mut resize_last_leaf = |_leaf_index: u64, leaf: &mut DataLeafNode<B>| -> Result<()> {
            leaf.resize(new_last_leaf_num_bytes)
        };
        self._traverse_leaves(last_leaf_index, last_leaf_index + 1, &mut resize_last_leaf)
            .await?;

        self.num_bytes_cache
            .update(&layout, new_num_leaves, new_num_bytes)
    }

    async fn _grow(
        &mut self,
        old_num_leaves: u64,
        new_num_leaves: u64,
        new_depth: u8,
    ) -> Result<()> {
        let max_bytes_per_leaf = self.node_store.layout().max_bytes_per_leaf();
        let old_last_leaf_index = old_num_leaves - 1;
        let mut fill_leaf = |_leaf_index: u64, leaf: &mut DataLeafNode<B>| -> Result<()> {
            leaf.resize(max_bytes_per_leaf)
        };
        self._traverse_leaves(old_last_leaf_index, old_last_leaf_index + 1, &mut fill_leaf)
            .await?;

        while self.depth() < new_depth {
            self._increase_depth().await?;
        }

        let node_store = self.node_store;
        match self.root_node.as_mut().expect("root_node is None") {
            DataNode::Inner(root) => {
                traversal::grow_subtree(node_store, root, old_num_leaves, new_num_leaves).await
            }
            DataNode::Leaf(_) => {
                unreachable!("A tree with more than one leaf always has an inner root node")
            }
        }
    }

    /// Move the root's content into a new child and make the root an inner node above it.
    /// The root keeps its block id.
    async fn _increase_depth(&mut self) -> Result<()> {
        let node_store = self.node_store;
        let copy = node_store
            .create_new_node_as_copy_from(self._root())
            .await?;
        let root = self.root_node.take().expect("root_node is None");
        let new_root = root.convert_to_new_inner_node(&copy, node_store.layout())?;
        log::debug!(
            "Increased depth of tree {:?} to {}",
            new_root.block_id(),
            new_root.depth()
        );
        self.root_node = Some(new_root.upcast());
        Ok(())
    }

    async fn _shrink(&mut self, new_num_leaves: u64) -> Result<()> {
        let node_store = self.node_store;
        match self.root_node.as_mut().expect("root_node is None") {
            DataNode::Inner(root) => {
                traversal::shrink_subtree(node_store, root, new_num_leaves).await?
            }
            DataNode::Leaf(_) => {
                unreachable!("A tree with more than one leaf always has an inner root node")
            }
        }
        self._collapse_single_child_roots().await
    }

    /// While the root has only one child, replace the root's content with that child.
    /// The root keeps its block id.
    async fn _collapse_single_child_roots(&mut self) -> Result<()> {
        let node_store = self.node_store;
        loop {
            let child_id = match self._root() {
                DataNode::Inner(root) if root.num_children().get() == 1 => root.read_last_child(),
                _ => return Ok(()),
            };
            let depth = self.depth();
            let child = traversal::load_child(node_store, child_id, depth - 1).await?;
            let root = self.root_node.take().expect("root_node is None");
            self.root_node = Some(root.overwrite_node_with(&child, node_store.layout())?);
            child.remove(node_store).await?;
            log::debug!(
                "Decreased depth of tree {:?} to {}",
                self.root_node_id(),
                depth - 1
            );
        }
    }

    async fn _traverse_leaves(
        &mut self,
        begin_leaf: u64,
        end_leaf: u64,
        callback: &mut (dyn FnMut(u64, &mut DataLeafNode<B>) -> Result<()> + Send),
    ) -> Result<()> {
        let node_store = self.node_store;
        let root_node = self.root_node.as_mut().expect("root_node is None");
        traversal::traverse_leaves(node_store, root_node, 0, begin_leaf, end_leaf, callback).await
    }

    pub async fn flush(&mut self) -> Result<()> {
        let node_store = self.node_store;
        let root_node = self.root_node.as_mut().expect("root_node is None");
        node_store.flush_node(root_node).await
    }

    /// Remove all nodes of the tree, the root first.
    pub async fn remove(mut self) -> Result<()> {
        let root_node = self.root_node.take().expect("root_node is None");
        traversal::remove_subtree(self.node_store, root_node).await
    }

    /// Ids of all nodes in the tree, starting with the root.
    pub async fn all_blocks(&self) -> Result<Vec<BlockId>> {
        let mut result = Vec::new();
        traversal::all_blocks_in_subtree(self.node_store, self._root(), &mut result).await?;
        Ok(result)
    }
}

/// Smallest root depth whose subtree has space for `num_leaves` leaves.
fn required_depth(layout: &NodeLayout, num_leaves: u64, num_bytes: u64) -> Result<u8> {
    for depth in 0..=MAX_DEPTH {
        match layout.num_leaves_per_full_subtree(depth) {
            Ok(capacity) if capacity.get() < num_leaves => continue,
            // An overflowing capacity is more than enough
            _ => return Ok(depth),
        }
    }
    bail!(NodeError::CapacityExceeded {
        requested: num_bytes,
        capacity: layout.max_bytes_per_subtree(MAX_DEPTH).unwrap_or(u64::MAX),
    })
}

impl<'a, B: BlockStore + Send + Sync + 'static> Debug for DataTree<'a, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTree")
            .field(
                "root_node_id",
                &self.root_node.as_ref().map(|root| *root.block_id()),
            )
            .field("num_bytes_cache", &self.num_bytes_cache)
            .finish()
    }
}
