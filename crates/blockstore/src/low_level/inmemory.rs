use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use std::collections::hash_map::{Entry, HashMap};
use std::fmt::{self, Debug};
use std::pin::Pin;
use std::sync::RwLock;
use sysinfo::{System, SystemExt};

use super::{
    BlockStore, BlockStoreDeleter, BlockStoreReader, BlockStoreWriter, RemoveResult,
    TryCreateResult,
};
use crate::BlockId;
use blocktree_utils::{
    async_drop::{AsyncDrop, AsyncDropGuard},
    data::Data,
};

/// Keeps all blocks in a map. Content is lost when the store is dropped.
pub struct InMemoryBlockStore {
    blocks: RwLock<HashMap<BlockId, Data>>,
}

impl InMemoryBlockStore {
    pub fn new() -> AsyncDropGuard<Self> {
        AsyncDropGuard::new(Self {
            blocks: RwLock::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl BlockStoreReader for InMemoryBlockStore {
    async fn exists(&self, id: &BlockId) -> Result<bool> {
        let blocks = self
            .blocks
            .read()
            .map_err(|_| anyhow!("Failed to acquire lock"))?;
        Ok(blocks.contains_key(id))
    }

    async fn load(&self, id: &BlockId) -> Result<Option<Data>> {
        let blocks = self
            .blocks
            .read()
            .map_err(|_| anyhow!("Failed to acquire lock"))?;
        Ok(blocks.get(id).cloned())
    }

    async fn num_blocks(&self) -> Result<u64> {
        let blocks = self
            .blocks
            .read()
            .map_err(|_| anyhow!("Failed to acquire lock"))?;
        Ok(blocks.len() as u64)
    }

    fn estimate_num_free_bytes(&self) -> Result<u64> {
        let mut sys = System::new();
        sys.refresh_memory();
        Ok(sys.available_memory())
    }

    fn block_size_from_physical_block_size(&self, block_size: u64) -> Result<u64> {
        Ok(block_size)
    }

    async fn all_blocks(&self) -> Result<Pin<Box<dyn Stream<Item = Result<BlockId>> + Send>>> {
        let blocks = self
            .blocks
            .read()
            .map_err(|_| anyhow!("Failed to acquire lock"))?;
        // Collect so the lock isn't held while the caller consumes the stream
        let ids: Vec<Result<BlockId>> = blocks.keys().copied().map(Ok).collect();
        Ok(futures::stream::iter(ids).boxed())
    }
}

#[async_trait]
impl BlockStoreWriter for InMemoryBlockStore {
    async fn try_create(&self, id: &BlockId, data: &[u8]) -> Result<TryCreateResult> {
        let mut blocks = self
            .blocks
            .write()
            .map_err(|_| anyhow!("Failed to acquire lock"))?;
        match blocks.entry(*id) {
            Entry::Occupied(_) => Ok(TryCreateResult::NotCreatedBecauseBlockIdAlreadyExists),
            Entry::Vacant(entry) => {
                entry.insert(data.into());
                Ok(TryCreateResult::SuccessfullyCreated)
            }
        }
    }

    async fn store(&self, id: &BlockId, data: &[u8]) -> Result<()> {
        let mut blocks = self
            .blocks
            .write()
            .map_err(|_| anyhow!("Failed to acquire lock"))?;
        blocks.insert(*id, data.into());
        Ok(())
    }
}

#[async_trait]
impl BlockStoreDeleter for InMemoryBlockStore {
    async fn remove(&self, id: &BlockId) -> Result<RemoveResult> {
        let mut blocks = self
            .blocks
            .write()
            .map_err(|_| anyhow!("Failed to acquire lock"))?;
        match blocks.remove(id) {
            Some(_) => Ok(RemoveResult::SuccessfullyRemoved),
            None => Ok(RemoveResult::NotRemovedBecauseItDoesntExist),
        }
    }
}

impl Debug for InMemoryBlockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InMemoryBlockStore")
    }
}

#[async_trait]
impl AsyncDrop for InMemoryBlockStore {
    type Error = anyhow::Error;
    async fn async_drop_impl(&mut self) -> Result<()> {
        Ok(())
    }
}

impl BlockStore for InMemoryBlockStore {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::low_level::tests::Fixture;

    struct TestFixture {}
    impl Fixture for TestFixture {
        type ConcreteBlockStore = InMemoryBlockStore;
        fn new() -> Self {
            Self {}
        }
        fn store(&mut self) -> AsyncDropGuard<Self::ConcreteBlockStore> {
            InMemoryBlockStore::new()
        }
    }

    crate::instantiate_blockstore_tests!(TestFixture);

    #[tokio::test]
    async fn test_block_size_from_physical_block_size() {
        let mut fixture = TestFixture::new();
        let mut store = fixture.store();

        assert_eq!(0u64, store.block_size_from_physical_block_size(0).unwrap());
        assert_eq!(20u64, store.block_size_from_physical_block_size(20).unwrap());

        store.async_drop().await.unwrap();
    }
}
