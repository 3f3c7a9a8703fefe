use futures::future::BoxFuture;

use blocktree_blockstore::{BlockId, BlockStore, InMemoryBlockStore, LockingBlockStore};
use blocktree_utils::data::Data;

use super::super::data_node_store::{testutils::data_fixture, DataNodeStore};
use super::{store::DataTreeStore, tree::DataTree};

pub const PHYSICAL_BLOCK_SIZE_BYTES: u32 = 1024;

/// A tree filled with reproducible data that can later be checked for integrity.
pub struct TreeFixture {
    root_id: BlockId,
    data_seed: u64,
    num_bytes: usize,
}

impl TreeFixture {
    pub async fn create_tree_with_data<B: BlockStore + Send + Sync + 'static>(
        store: &DataTreeStore<B>,
        num_bytes: usize,
        data_seed: u64,
    ) -> Self {
        let mut tree = store.create_tree().await.unwrap();
        tree.write_bytes(&data(num_bytes, data_seed), 0)
            .await
            .unwrap();
        TreeFixture {
            root_id: *tree.root_node_id(),
            data_seed,
            num_bytes,
        }
    }

    pub fn root_id(&self) -> BlockId {
        self.root_id
    }

    pub async fn assert_data_is_still_intact<B: BlockStore + Send + Sync + 'static>(
        &self,
        store: &DataTreeStore<B>,
    ) {
        let mut tree = store.load_tree(self.root_id).await.unwrap().unwrap();
        assert_eq!(self.num_bytes as u64, tree.num_bytes().await.unwrap());
        let mut target = vec![0; self.num_bytes];
        tree.read_bytes(0, &mut target).await.unwrap();
        assert_eq!(data(self.num_bytes, self.data_seed).as_ref(), &target);
    }
}

pub fn data(size: usize, seed: u64) -> Data {
    data_fixture(size, seed)
}

pub async fn create_one_leaf_tree<B: BlockStore + Send + Sync + 'static>(
    store: &DataTreeStore<B>,
) -> DataTree<'_, B> {
    store.create_tree().await.unwrap()
}

/// A tree with `num_leaves` full leaves of zeroes.
pub async fn create_multi_leaf_tree<B: BlockStore + Send + Sync + 'static>(
    store: &DataTreeStore<B>,
    num_leaves: u64,
) -> DataTree<'_, B> {
    let mut tree = store.create_tree().await.unwrap();
    tree.resize_num_bytes(num_leaves * store.virtual_block_size_bytes() as u64)
        .await
        .unwrap();
    tree
}

pub async fn with_treestore(
    f: impl FnOnce(&DataTreeStore<InMemoryBlockStore>) -> BoxFuture<'_, ()>,
) {
    with_treestore_with_blocksize(PHYSICAL_BLOCK_SIZE_BYTES, f).await
}

pub async fn with_treestore_with_blocksize(
    blocksize_bytes: u32,
    f: impl FnOnce(&DataTreeStore<InMemoryBlockStore>) -> BoxFuture<'_, ()>,
) {
    let nodestore = DataNodeStore::new(
        LockingBlockStore::new(InMemoryBlockStore::new()),
        blocksize_bytes,
    )
    .await
    .unwrap();
    let mut treestore = DataTreeStore::new(nodestore);
    f(&treestore).await;
    treestore.async_drop().await.unwrap();
}
