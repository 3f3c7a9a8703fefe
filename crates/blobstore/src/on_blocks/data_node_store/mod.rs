use anyhow::{bail, ensure, Context, Result};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use blocktree_blockstore::{BlockId, BlockStore, LockingBlockStore, RemoveResult};
use blocktree_utils::async_drop::{AsyncDrop, AsyncDropGuard};

mod error;
pub use error::NodeError;

mod layout;
pub use layout::{NodeLayout, MAX_DEPTH};

mod data_node;
pub use data_node::{DataInnerNode, DataLeafNode, DataNode};

#[cfg(test)]
pub(crate) mod testutils;

/// Creates, loads, copies and removes nodes. All nodes of a store share one [NodeLayout].
#[derive(Debug)]
pub struct DataNodeStore<B: BlockStore + Send + Sync + 'static> {
    block_store: AsyncDropGuard<LockingBlockStore<B>>,
    layout: NodeLayout,
}

impl<B: BlockStore + Send + Sync + 'static> DataNodeStore<B> {
    /// Fails if the blocks of `block_store` would be too small to build a tree from.
    /// `block_store` is dropped in that case.
    pub async fn new(
        mut block_store: AsyncDropGuard<LockingBlockStore<B>>,
        physical_block_size_bytes: u32,
    ) -> Result<AsyncDropGuard<Self>> {
        let block_size_bytes =
            match Self::_block_size_bytes(&block_store, physical_block_size_bytes) {
                Ok(ok) => ok,
                Err(err) => {
                    block_store.async_drop().await?;
                    return Err(err);
                }
            };

        Ok(AsyncDropGuard::new(Self {
            block_store,
            layout: NodeLayout { block_size_bytes },
        }))
    }

    fn _block_size_bytes(
        block_store: &LockingBlockStore<B>,
        physical_block_size_bytes: u32,
    ) -> Result<u32> {
        let block_size_bytes = block_store
            .block_size_from_physical_block_size(u64::from(physical_block_size_bytes))?;
        let block_size_bytes = u32::try_from(block_size_bytes)
            .context("Block size of the underlying block store doesn't fit into u32")?;

        let min_block_size = NodeLayout::min_block_size_bytes() as u32;
        ensure!(
            block_size_bytes >= min_block_size,
            "Tried to create a DataNodeStore with block size {} (physical: {}) but must be at least {}",
            block_size_bytes,
            physical_block_size_bytes,
            min_block_size,
        );
        Ok(block_size_bytes)
    }

    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    /// Fails with [NodeError::NotFound] if there is no such node.
    pub async fn load(&self, node_id: BlockId) -> Result<DataNode<B>> {
        match self.try_load(node_id).await? {
            Some(node) => Ok(node),
            None => bail!(NodeError::NotFound { node_id }),
        }
    }

    pub async fn try_load(&self, node_id: BlockId) -> Result<Option<DataNode<B>>> {
        match self.block_store.load(node_id).await? {
            None => Ok(None),
            Some(block) => DataNode::parse(block, &self.layout).map(Some),
        }
    }

    pub async fn create_new_leaf_node(&self, data: &[u8]) -> Result<DataLeafNode<B>> {
        DataLeafNode::create_new_node(&self.block_store, &self.layout, data).await
    }

    pub async fn try_create_new_leaf_node(
        &self,
        block_id: BlockId,
        data: &[u8],
    ) -> Result<DataLeafNode<B>> {
        match DataLeafNode::try_create_new_node(&self.block_store, &self.layout, &block_id, data)
            .await?
        {
            Some(node) => Ok(node),
            None => bail!("Block already exists"),
        }
    }

    pub async fn create_new_inner_node(
        &self,
        depth: u8,
        children: &[BlockId],
    ) -> Result<DataInnerNode<B>> {
        DataInnerNode::create_new_node(&self.block_store, &self.layout, depth, children).await
    }

    /// Byte copy of `source` under a new id. Changes to the copy don't affect `source`.
    pub async fn create_new_node_as_copy_from(&self, source: &DataNode<B>) -> Result<DataNode<B>> {
        let source_data = source.raw_blockdata();
        assert_eq!(
            self.layout.block_size_bytes as usize,
            source_data.len(),
            "Source node has wrong layout and has {} bytes. We expected {} bytes. Is it from the same DataNodeStore?",
            source_data.len(),
            self.layout.block_size_bytes
        );
        let block = self.block_store.create(source_data).await?;
        DataNode::parse(block, &self.layout)
    }

    /// Replace whatever is stored under `block_id` (or nothing) with a leaf holding `data`.
    pub async fn overwrite_with_leaf_node(&self, block_id: &BlockId, data: &[u8]) -> Result<()> {
        let block_data = data_node::serialize_leaf_node(data, &self.layout)?;
        self.block_store.overwrite(block_id, &block_data).await
    }

    pub async fn remove_by_id(&self, block_id: &BlockId) -> Result<RemoveResult> {
        self.block_store.remove(block_id).await
    }

    pub async fn num_nodes(&self) -> Result<u64> {
        self.block_store.num_blocks().await
    }

    pub fn estimate_space_for_num_blocks_left(&self) -> Result<u64> {
        Ok(self.block_store.estimate_num_free_bytes()?
            / u64::from(self.layout.max_bytes_per_leaf()))
    }

    /// Number of payload bytes a leaf can hold.
    pub fn virtual_block_size_bytes(&self) -> u32 {
        self.layout.max_bytes_per_leaf()
    }

    pub async fn flush_node(&self, node: &mut DataNode<B>) -> Result<()> {
        node.flush(self).await
    }

    pub async fn all_nodes(&self) -> Result<Pin<Box<dyn Stream<Item = Result<BlockId>> + Send>>> {
        self.block_store.all_blocks().await
    }

    /// Wait until all released nodes are written back. Must not be called while holding a node.
    pub async fn clear_cache(&self) -> Result<()> {
        self.block_store.clear_cache().await
    }
}

#[async_trait]
impl<B: BlockStore + Send + Sync + 'static> AsyncDrop for DataNodeStore<B> {
    type Error = anyhow::Error;

    async fn async_drop_impl(&mut self) -> Result<(), Self::Error> {
        self.block_store.async_drop().await
    }
}
