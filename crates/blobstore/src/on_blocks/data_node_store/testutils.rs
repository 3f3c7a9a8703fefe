use futures::future::{self, BoxFuture};
use futures::join;

use super::{DataInnerNode, DataLeafNode, DataNode, DataNodeStore, NodeLayout};
use blocktree_blockstore::{BlockId, InMemoryBlockStore, LockingBlockStore};
use blocktree_utils::data::Data;
pub use blocktree_utils::testutils::data_fixture;

pub const PHYSICAL_BLOCK_SIZE_BYTES: u32 = 1024;

pub async fn new_full_leaf_node(
    nodestore: &DataNodeStore<InMemoryBlockStore>,
) -> DataLeafNode<InMemoryBlockStore> {
    nodestore
        .create_new_leaf_node(&full_leaf_data(1))
        .await
        .unwrap()
}

pub async fn new_empty_leaf_node(
    nodestore: &DataNodeStore<InMemoryBlockStore>,
) -> DataLeafNode<InMemoryBlockStore> {
    nodestore.create_new_leaf_node(&[]).await.unwrap()
}

/// Inner node of depth 1 with a full and a half full leaf.
pub async fn new_inner_node(
    nodestore: &DataNodeStore<InMemoryBlockStore>,
) -> DataInnerNode<InMemoryBlockStore> {
    let leaf1_data = full_leaf_data(1);
    let leaf2_data = half_full_leaf_data(2);
    let (leaf1, leaf2) = join!(
        nodestore.create_new_leaf_node(&leaf1_data),
        nodestore.create_new_leaf_node(&leaf2_data),
    );
    nodestore
        .create_new_inner_node(1, &[*leaf1.unwrap().block_id(), *leaf2.unwrap().block_id()])
        .await
        .unwrap()
}

/// Inner node of depth 1 with as many full leaves as fit.
pub async fn new_full_inner_node(
    nodestore: &DataNodeStore<InMemoryBlockStore>,
) -> DataInnerNode<InMemoryBlockStore> {
    let leaves = new_full_leaves(nodestore, nodestore.layout().max_children_per_inner_node()).await;
    nodestore.create_new_inner_node(1, &leaves).await.unwrap()
}

pub async fn new_full_leaves(
    nodestore: &DataNodeStore<InMemoryBlockStore>,
    num: u32,
) -> Vec<BlockId> {
    let leaf_data = data_fixture(nodestore.layout().max_bytes_per_leaf() as usize, 1);
    future::join_all(
        (0..num)
            .map(|_| nodestore.create_new_leaf_node(&leaf_data))
            .collect::<Vec<_>>(),
    )
    .await
    .into_iter()
    .map(|n| *n.unwrap().block_id())
    .collect::<Vec<_>>()
}

pub async fn new_inner_nodes(
    nodestore: &DataNodeStore<InMemoryBlockStore>,
    num: u32,
) -> Vec<BlockId> {
    future::join_all(
        (0..num)
            .map(|_| new_inner_node(nodestore))
            .collect::<Vec<_>>(),
    )
    .await
    .into_iter()
    .map(|n| *n.block_id())
    .collect::<Vec<_>>()
}

pub async fn load_node(
    nodestore: &DataNodeStore<InMemoryBlockStore>,
    block_id: BlockId,
) -> DataNode<InMemoryBlockStore> {
    nodestore.load(block_id).await.unwrap()
}

pub async fn load_inner_node(
    nodestore: &DataNodeStore<InMemoryBlockStore>,
    block_id: BlockId,
) -> DataInnerNode<InMemoryBlockStore> {
    let DataNode::Inner(inner) = nodestore.load(block_id).await.unwrap() else {
        panic!("Expected to load an inner node but got a leaf node instead");
    };
    inner
}

pub async fn load_leaf_node(
    nodestore: &DataNodeStore<InMemoryBlockStore>,
    block_id: BlockId,
) -> DataLeafNode<InMemoryBlockStore> {
    let DataNode::Leaf(leaf) = nodestore.load(block_id).await.unwrap() else {
        panic!("Expected to load a leaf node but got an inner node instead");
    };
    leaf
}

pub async fn with_nodestore(
    f: impl FnOnce(&DataNodeStore<InMemoryBlockStore>) -> BoxFuture<'_, ()>,
) {
    with_nodestore_with_blocksize(PHYSICAL_BLOCK_SIZE_BYTES, f).await
}

pub async fn with_nodestore_with_blocksize(
    blocksize_bytes: u32,
    f: impl FnOnce(&DataNodeStore<InMemoryBlockStore>) -> BoxFuture<'_, ()>,
) {
    let mut nodestore = DataNodeStore::new(
        LockingBlockStore::new(InMemoryBlockStore::new()),
        blocksize_bytes,
    )
    .await
    .unwrap();
    f(&nodestore).await;
    nodestore.async_drop().await.unwrap();
}

pub fn half_full_leaf_data(seed: u64) -> Data {
    let len = NodeLayout {
        block_size_bytes: PHYSICAL_BLOCK_SIZE_BYTES,
    }
    .max_bytes_per_leaf() as usize
        / 2;
    data_fixture(len, seed)
}

pub fn full_leaf_data(seed: u64) -> Data {
    let len = NodeLayout {
        block_size_bytes: PHYSICAL_BLOCK_SIZE_BYTES,
    }
    .max_bytes_per_leaf() as usize;
    data_fixture(len, seed)
}
