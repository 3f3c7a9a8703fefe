//! The block stores the rest of the system is built on. They only know how to
//! create, load, overwrite and remove opaque fixed-size byte blocks by [BlockId].
//! They don't lock, cache or interpret anything.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::Stream;
use std::fmt::Debug;
use std::pin::Pin;

use crate::BlockId;
use blocktree_utils::{async_drop::AsyncDrop, data::Data};

#[async_trait]
pub trait BlockStoreReader {
    async fn exists(&self, id: &BlockId) -> Result<bool>;

    /// Returns `None` if the block doesn't exist. That is not an error.
    async fn load(&self, id: &BlockId) -> Result<Option<Data>>;

    async fn num_blocks(&self) -> Result<u64>;

    fn estimate_num_free_bytes(&self) -> Result<u64>;

    /// How many bytes of payload a block can hold if it should take up `block_size` bytes on the underlying storage.
    fn block_size_from_physical_block_size(&self, block_size: u64) -> Result<u64>;

    async fn all_blocks(&self) -> Result<Pin<Box<dyn Stream<Item = Result<BlockId>> + Send>>>;
}

#[async_trait]
pub trait BlockStoreWriter {
    async fn try_create(&self, id: &BlockId, data: &[u8]) -> Result<TryCreateResult>;

    /// Create the block or overwrite it if it already exists.
    async fn store(&self, id: &BlockId, data: &[u8]) -> Result<()>;
}

#[async_trait]
pub trait BlockStoreDeleter {
    async fn remove(&self, id: &BlockId) -> Result<RemoveResult>;
}

pub trait BlockStore:
    BlockStoreReader + BlockStoreWriter + BlockStoreDeleter + AsyncDrop<Error = anyhow::Error> + Debug
{
}

#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub enum TryCreateResult {
    SuccessfullyCreated,
    NotCreatedBecauseBlockIdAlreadyExists,
}

#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub enum RemoveResult {
    SuccessfullyRemoved,
    NotRemovedBecauseItDoesntExist,
}

mod inmemory;
pub use inmemory::InMemoryBlockStore;

mod ondisk;
pub use ondisk::OnDiskBlockStore;
