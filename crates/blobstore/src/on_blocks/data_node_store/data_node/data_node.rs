use binary_layout::Field;
use anyhow::Result;

use super::super::{
    layout::{node, NodeLayout},
    DataNodeStore,
};
use super::{
    data_inner_node::{self, DataInnerNode},
    data_leaf_node::DataLeafNode,
};
use blocktree_blockstore::{Block, BlockId, BlockStore};
use blocktree_utils::data::{Data, ZeroedData};

#[derive(Debug)]
pub enum DataNode<B: BlockStore + Send + Sync + 'static> {
    Inner(DataInnerNode<B>),
    Leaf(DataLeafNode<B>),
}

impl<B: BlockStore + Send + Sync + 'static> DataNode<B> {
    /// Decide from the stored depth whether the block is a leaf or an inner node.
    /// Anything that doesn't look like a node is reported as [crate::NodeError::Corrupt].
    pub fn parse(block: Block<B>, layout: &NodeLayout) -> Result<Self> {
        // Blocks too short to have a depth field are rejected by the leaf's size check
        let depth = block
            .data()
            .get(node::depth::OFFSET)
            .copied()
            .unwrap_or(0);
        if depth == 0 {
            Ok(DataNode::Leaf(DataLeafNode::new(block, layout)?))
        } else {
            Ok(DataNode::Inner(DataInnerNode::new(block, layout)?))
        }
    }

    pub fn depth(&self) -> u8 {
        match self {
            Self::Leaf(_) => 0,
            Self::Inner(inner) => inner.depth().get(),
        }
    }

    pub fn block_id(&self) -> &BlockId {
        match self {
            Self::Leaf(leaf) => leaf.block_id(),
            Self::Inner(inner) => inner.block_id(),
        }
    }

    pub fn as_leaf(&self) -> Option<&DataLeafNode<B>> {
        match self {
            Self::Leaf(leaf) => Some(leaf),
            Self::Inner(_) => None,
        }
    }

    pub fn as_inner(&self) -> Option<&DataInnerNode<B>> {
        match self {
            Self::Leaf(_) => None,
            Self::Inner(inner) => Some(inner),
        }
    }

    pub(in super::super) fn raw_blockdata(&self) -> &Data {
        match self {
            Self::Leaf(leaf) => leaf.raw_blockdata(),
            Self::Inner(inner) => inner.raw_blockdata(),
        }
    }

    pub async fn remove(self, node_store: &DataNodeStore<B>) -> Result<()> {
        node_store.block_store.remove_block(self._into_block()).await
    }

    pub async fn flush(&mut self, node_store: &DataNodeStore<B>) -> Result<()> {
        node_store.block_store.flush_block(self.as_block_mut()).await
    }

    fn _into_block(self) -> Block<B> {
        match self {
            Self::Leaf(leaf) => leaf.into_block(),
            Self::Inner(inner) => inner.into_block(),
        }
    }

    pub(in super::super) fn as_block_mut(&mut self) -> &mut Block<B> {
        match self {
            Self::Leaf(leaf) => leaf.as_block_mut(),
            Self::Inner(inner) => inner.as_block_mut(),
        }
    }

    /// Reuse this node's block for an inner node with `first_child` as its only child.
    ///
    /// The previous content of the block is lost, so the caller has to have copied it
    /// somewhere (usually into `first_child`) before.
    pub fn convert_to_new_inner_node(
        self,
        first_child: &DataNode<B>,
        layout: &NodeLayout,
    ) -> Result<DataInnerNode<B>> {
        let depth = first_child.depth() + 1;
        let children = [*first_child.block_id()];
        data_inner_node::check_new_inner_node(depth, &children, layout)?;
        let mut block = self._into_block();
        let block_data: ZeroedData<&mut Data> = ZeroedData::fill_with_zeroes(block.data_mut());
        data_inner_node::initialize_inner_node(depth, &children, layout, block_data);
        DataInnerNode::new(block, layout)
    }

    /// Replace this node's block content with a byte copy of `source`, keeping this node's id.
    pub fn overwrite_node_with(
        self,
        source: &DataNode<B>,
        layout: &NodeLayout,
    ) -> Result<DataNode<B>> {
        let mut block = self._into_block();
        let dest_data = block.data_mut();
        let source_data = source.raw_blockdata();
        assert_eq!(
            layout.block_size_bytes as usize,
            source_data.len(),
            "Source block has {} bytes but the layout expects {}",
            source_data.len(),
            layout.block_size_bytes
        );
        assert_eq!(
            layout.block_size_bytes as usize,
            dest_data.len(),
            "Destination block has {} bytes but the layout expects {}",
            dest_data.len(),
            layout.block_size_bytes
        );
        dest_data.copy_from_slice(source_data);
        DataNode::parse(block, layout)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::super::super::error::{assert_node_error, NodeError};
    use super::super::super::testutils::*;
    use super::*;
    use blocktree_blockstore::BLOCKID_LEN;

    mod parse {
        use super::*;

        #[tokio::test]
        async fn leaf() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node_id = *new_full_leaf_node(nodestore).await.block_id();
                    let node = load_node(nodestore, node_id).await;
                    assert_eq!(0, node.depth());
                    assert!(node.as_leaf().is_some());
                    assert!(node.as_inner().is_none());
                })
            })
            .await;
        }

        #[tokio::test]
        async fn inner() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node_id = *new_inner_node(nodestore).await.block_id();
                    let node = load_node(nodestore, node_id).await;
                    assert_eq!(1, node.depth());
                    assert!(node.as_leaf().is_none());
                    assert_eq!(2, node.as_inner().unwrap().num_children().get());
                })
            })
            .await;
        }

        #[tokio::test]
        async fn garbage_block_is_corrupt() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node_id = *new_inner_node(nodestore).await.block_id();
                    nodestore
                        .block_store
                        .overwrite(&node_id, &vec![0xFF; PHYSICAL_BLOCK_SIZE_BYTES as usize].into())
                        .await
                        .unwrap();

                    let err = nodestore.load(node_id).await.unwrap_err();
                    match err.downcast_ref::<NodeError>() {
                        Some(NodeError::Corrupt { node_id: id, .. }) => assert_eq!(node_id, *id),
                        _ => panic!("Expected a Corrupt error but got {:?}", err),
                    }
                })
            })
            .await;
        }

        #[tokio::test]
        async fn truncated_block_is_corrupt() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node_id = *new_full_leaf_node(nodestore).await.block_id();
                    nodestore
                        .block_store
                        .overwrite(&node_id, &data_fixture(5, 0))
                        .await
                        .unwrap();

                    assert_node_error(
                        NodeError::corrupt(node_id, "Loaded block of size 5 but expected 1024"),
                        nodestore.load(node_id).await.unwrap_err(),
                    );
                })
            })
            .await;
        }
    }

    mod block_id {
        use super::*;

        #[tokio::test]
        async fn loadedLeaf_hasCorrectId() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node_id = *new_full_leaf_node(nodestore).await.block_id();
                    assert_eq!(node_id, *load_node(nodestore, node_id).await.block_id());
                })
            })
            .await;
        }

        #[tokio::test]
        async fn loadedInner_hasCorrectId() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node_id = *new_inner_node(nodestore).await.block_id();
                    assert_eq!(node_id, *load_node(nodestore, node_id).await.block_id());
                })
            })
            .await;
        }
    }

    mod remove {
        use super::*;

        #[tokio::test]
        async fn removedNode_isGone() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node = new_full_leaf_node(nodestore).await.upcast();
                    let node_id = *node.block_id();
                    let other_id = *new_full_leaf_node(nodestore).await.block_id();

                    node.remove(nodestore).await.unwrap();

                    assert!(nodestore.try_load(node_id).await.unwrap().is_none());
                    assert!(nodestore.try_load(other_id).await.unwrap().is_some());
                    assert_eq!(1, nodestore.num_nodes().await.unwrap());
                })
            })
            .await;
        }
    }

    mod convert_to_new_inner_node {
        use super::*;

        #[tokio::test]
        async fn fromLeaf() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node = new_full_leaf_node(nodestore).await.upcast();
                    let node_id = *node.block_id();
                    let first_child = new_full_leaf_node(nodestore).await.upcast();

                    let converted = node
                        .convert_to_new_inner_node(&first_child, nodestore.layout())
                        .unwrap();
                    assert_eq!(node_id, *converted.block_id());
                    assert_eq!(1, converted.depth().get());
                    assert_eq!(
                        vec![*first_child.block_id()],
                        converted.children().collect::<Vec<_>>()
                    );
                    drop(converted);
                    drop(first_child);
                    nodestore.clear_cache().await.unwrap();

                    let loaded = load_inner_node(nodestore, node_id).await;
                    assert_eq!(1, loaded.depth().get());
                    assert_eq!(1, loaded.num_children().get());
                    let used_end = NodeLayout::header_len() + BLOCKID_LEN;
                    assert!(loaded.raw_blockdata()[used_end..].iter().all(|b| *b == 0));
                })
            })
            .await;
        }

        #[tokio::test]
        async fn fromInner() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node = new_full_inner_node(nodestore).await.upcast();
                    let node_id = *node.block_id();
                    let first_child = new_inner_node(nodestore).await.upcast();

                    let converted = node
                        .convert_to_new_inner_node(&first_child, nodestore.layout())
                        .unwrap();
                    assert_eq!(node_id, *converted.block_id());
                    assert_eq!(2, converted.depth().get());
                    assert_eq!(*first_child.block_id(), converted.read_last_child());
                })
            })
            .await;
        }
    }

    mod overwrite_node_with {
        use super::*;

        #[tokio::test]
        async fn leafWithInner() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let dest = new_full_leaf_node(nodestore).await.upcast();
                    let dest_id = *dest.block_id();
                    let source = new_inner_node(nodestore).await.upcast();

                    let result = dest
                        .overwrite_node_with(&source, nodestore.layout())
                        .unwrap();

                    assert_eq!(dest_id, *result.block_id());
                    assert_eq!(1, result.depth());
                    assert_eq!(source.raw_blockdata(), result.raw_blockdata());
                })
            })
            .await;
        }

        #[tokio::test]
        async fn innerWithLeaf() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let dest = new_inner_node(nodestore).await.upcast();
                    let dest_id = *dest.block_id();
                    let source = nodestore
                        .create_new_leaf_node(&half_full_leaf_data(3))
                        .await
                        .unwrap()
                        .upcast();

                    let result = dest
                        .overwrite_node_with(&source, nodestore.layout())
                        .unwrap();
                    drop(result);
                    drop(source);
                    nodestore.clear_cache().await.unwrap();

                    let loaded = load_leaf_node(nodestore, dest_id).await;
                    assert_eq!(&half_full_leaf_data(3)[..], loaded.data());
                })
            })
            .await;
        }
    }
}
