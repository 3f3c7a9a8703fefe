use anyhow::Result;
use async_trait::async_trait;

#[cfg(test)]
use crate::on_blocks::data_node_store::DataNode;
use crate::on_blocks::data_node_store::DataNodeStore;
use blocktree_blockstore::{BlockId, BlockStore, RemoveResult};
use blocktree_utils::async_drop::{AsyncDrop, AsyncDropGuard};

use super::tree::DataTree;

/// Hands out [DataTree] instances, each addressed by the id of its root node.
#[derive(Debug)]
pub struct DataTreeStore<B: BlockStore + Send + Sync + 'static> {
    node_store: AsyncDropGuard<DataNodeStore<B>>,
}

impl<B: BlockStore + Send + Sync + 'static> DataTreeStore<B> {
    pub fn new(node_store: AsyncDropGuard<DataNodeStore<B>>) -> AsyncDropGuard<Self> {
        AsyncDropGuard::new(Self { node_store })
    }

    pub async fn load_tree(&self, root_node_id: BlockId) -> Result<Option<DataTree<'_, B>>> {
        Ok(self
            .node_store
            .try_load(root_node_id)
            .await?
            .map(|root_node| DataTree::new(root_node, &self.node_store)))
    }

    /// A new tree storing zero bytes in a single leaf.
    pub async fn create_tree(&self) -> Result<DataTree<'_, B>> {
        let new_leaf = self.node_store.create_new_leaf_node(&[]).await?;
        Ok(DataTree::new(new_leaf.upcast(), &self.node_store))
    }

    /// Like [DataTreeStore::create_tree] but with a given root id. Fails if a node with that id already exists.
    pub async fn try_create_tree(&self, id: BlockId) -> Result<DataTree<'_, B>> {
        let new_leaf = self.node_store.try_create_new_leaf_node(id, &[]).await?;
        Ok(DataTree::new(new_leaf.upcast(), &self.node_store))
    }

    pub async fn remove_tree_by_id(&self, root_node_id: BlockId) -> Result<RemoveResult> {
        match self.load_tree(root_node_id).await? {
            Some(tree) => {
                tree.remove().await?;
                Ok(RemoveResult::SuccessfullyRemoved)
            }
            None => Ok(RemoveResult::NotRemovedBecauseItDoesntExist),
        }
    }

    pub async fn num_nodes(&self) -> Result<u64> {
        self.node_store.num_nodes().await
    }

    pub fn estimate_space_for_num_blocks_left(&self) -> Result<u64> {
        self.node_store.estimate_space_for_num_blocks_left()
    }

    pub fn virtual_block_size_bytes(&self) -> u32 {
        self.node_store.virtual_block_size_bytes()
    }

    /// Must not be called for a node that is currently loaded, e.g. the root of a loaded tree.
    pub async fn load_block_depth(&self, id: &BlockId) -> Result<Option<u8>> {
        Ok(self.node_store.try_load(*id).await?.map(|node| node.depth()))
    }

    /// Wait until all released nodes are written back. Must not be called while holding a tree.
    pub async fn clear_cache(&self) -> Result<()> {
        self.node_store.clear_cache().await
    }

    #[cfg(test)]
    pub(super) fn node_store(&self) -> &DataNodeStore<B> {
        &self.node_store
    }

    /// Ids of all nodes no other node points to, sorted. Loads every node.
    #[cfg(test)]
    pub(super) async fn all_tree_roots(&self) -> Result<Vec<BlockId>> {
        use futures::TryStreamExt;
        use std::collections::HashSet;

        let all_nodes: Vec<BlockId> = self.node_store.all_nodes().await?.try_collect().await?;
        let mut roots: HashSet<BlockId> = all_nodes.iter().copied().collect();
        for node_id in all_nodes {
            if let Some(DataNode::Inner(inner)) = self.node_store.try_load(node_id).await? {
                for child_id in inner.children() {
                    roots.remove(&child_id);
                }
            }
        }
        let mut roots: Vec<BlockId> = roots.into_iter().collect();
        roots.sort();
        Ok(roots)
    }
}

#[async_trait]
impl<B: BlockStore + Send + Sync + 'static> AsyncDrop for DataTreeStore<B> {
    type Error = anyhow::Error;

    async fn async_drop_impl(&mut self) -> Result<(), Self::Error> {
        self.node_store.async_drop().await
    }
}
