use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::{
    future,
    stream::{self, Stream, StreamExt, TryStreamExt},
};
use super::HashMapOwnedGuard;
use lockable::{AsyncLimit, InfallibleUnwrap, LockableHashMap};
use std::collections::HashSet;
use std::fmt::{self, Debug};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::block::Block;
use super::cache_entry::{BlockBaseStoreState, BlockCacheEntry, CacheEntryState};
use super::write_back::{self, WriteBackJob, WriteBackSender};
use crate::low_level::{BlockStore, RemoveResult};
use crate::BlockId;
use blocktree_utils::{
    async_drop::{AsyncDrop, AsyncDropGuard},
    data::Data,
};

pub struct LockingBlockStore<B: BlockStore + Send + Sync + 'static> {
    base_store: Arc<AsyncDropGuard<B>>,

    // The cache doubles as a set of mutexes making sure we don't do multiple
    // things to the same block concurrently, e.g. remove it while it is loaded.
    // Entries only live while their block is held or waiting for write-back.
    cache: Arc<LockableHashMap<BlockId, BlockCacheEntry>>,

    // Only eventually consistent. While an operation is adding or removing
    // entries, this may temporarily be off.
    num_blocks_in_cache_but_not_in_base_store: Arc<AtomicU64>,

    write_back: WriteBackSender,
    // Only None while being dropped
    writer: Option<JoinHandle<()>>,
}

impl<B: BlockStore + Send + Sync + 'static> LockingBlockStore<B> {
    /// Must be called from within a tokio runtime, it spawns the write-back task.
    pub fn new(base_store: AsyncDropGuard<B>) -> AsyncDropGuard<Self> {
        let base_store = Arc::new(base_store);
        let num_blocks_in_cache_but_not_in_base_store = Arc::new(AtomicU64::new(0));
        let (write_back, writer) = write_back::spawn_writer(
            Arc::clone(&base_store),
            Arc::clone(&num_blocks_in_cache_but_not_in_base_store),
        );
        AsyncDropGuard::new(Self {
            base_store,
            cache: Arc::new(LockableHashMap::new()),
            num_blocks_in_cache_but_not_in_base_store,
            write_back,
            writer: Some(writer),
        })
    }

    async fn _lock(&self, block_id: BlockId) -> HashMapOwnedGuard<BlockId, BlockCacheEntry> {
        self.cache
            .async_lock_owned(block_id, AsyncLimit::no_limit())
            .await
            .infallible_unwrap()
    }

    /// Waits until nobody else holds the block. Returns `None` if it doesn't exist.
    pub async fn load(&self, block_id: BlockId) -> Result<Option<Block<B>>> {
        let mut cache_entry = self._lock(block_id).await;
        if cache_entry.value().is_none() {
            if let Some(loaded) = self.base_store.load(&block_id).await? {
                cache_entry.insert(BlockCacheEntry::new(
                    loaded,
                    CacheEntryState::Clean,
                    BlockBaseStoreState::ExistsInBaseStore,
                ));
            }
        }
        if cache_entry.value().is_some() {
            Ok(Some(Block::new(cache_entry, self.write_back.clone())))
        } else {
            Ok(None)
        }
    }

    /// Returns `None` if a block with this id already exists.
    pub async fn try_create(&self, block_id: &BlockId, data: &Data) -> Result<Option<Block<B>>> {
        let mut cache_entry = self._lock(*block_id).await;
        if cache_entry.value().is_some() || self.base_store.exists(block_id).await? {
            return Ok(None);
        }
        cache_entry.insert(BlockCacheEntry::new(
            data.clone(),
            CacheEntryState::Dirty,
            BlockBaseStoreState::DoesntExistInBaseStore,
        ));
        self.num_blocks_in_cache_but_not_in_base_store
            .fetch_add(1, Ordering::SeqCst);
        Ok(Some(Block::new(cache_entry, self.write_back.clone())))
    }

    /// Create a block with a fresh random id.
    pub async fn create(&self, data: &Data) -> Result<Block<B>> {
        loop {
            let block_id = BlockId::new_random();
            if let Some(block) = self.try_create(&block_id, data).await? {
                return Ok(block);
            }
            log::warn!(
                "Randomly generated {:?} already exists, generating another one",
                block_id
            );
        }
    }

    /// Create or replace the block content. This goes straight to the base store.
    pub async fn overwrite(&self, block_id: &BlockId, data: &Data) -> Result<()> {
        let mut cache_entry = self._lock(*block_id).await;
        self.base_store.store(block_id, data).await?;
        // Only a block whose write-back failed can still have an entry here
        if let Some(old_entry) = cache_entry.remove() {
            if old_entry.base_store_state() == BlockBaseStoreState::DoesntExistInBaseStore {
                write_back::decrement(&self.num_blocks_in_cache_but_not_in_base_store);
            }
        }
        Ok(())
    }

    pub async fn remove(&self, block_id: &BlockId) -> Result<RemoveResult> {
        let mut cache_entry = self._lock(*block_id).await;
        if cache_entry.value().is_some() {
            if self._remove_cache_entry(&mut cache_entry).await?
                == RemoveResult::NotRemovedBecauseItDoesntExist
            {
                log::warn!(
                    "{:?} was cached as existing in the base store but wasn't there when removing it",
                    block_id
                );
            }
            Ok(RemoveResult::SuccessfullyRemoved)
        } else {
            self.base_store.remove(block_id).await
        }
    }

    /// Remove a block the caller already holds. Fails if it vanished from the base store underneath us.
    pub async fn remove_block(&self, block: Block<B>) -> Result<()> {
        let mut cache_entry = block.into_cache_entry();
        let block_id = *cache_entry.key();
        match self._remove_cache_entry(&mut cache_entry).await? {
            RemoveResult::SuccessfullyRemoved => Ok(()),
            RemoveResult::NotRemovedBecauseItDoesntExist => {
                bail!("Tried to remove {:?} but it didn't exist in the base store", block_id)
            }
        }
    }

    async fn _remove_cache_entry(
        &self,
        cache_entry: &mut HashMapOwnedGuard<BlockId, BlockCacheEntry>,
    ) -> Result<RemoveResult> {
        let block_id = *cache_entry.key();
        let removed = cache_entry
            .remove()
            .expect("Tried to remove a cache entry that wasn't set");
        match removed.base_store_state() {
            BlockBaseStoreState::ExistsInBaseStore => self.base_store.remove(&block_id).await,
            BlockBaseStoreState::DoesntExistInBaseStore => {
                write_back::decrement(&self.num_blocks_in_cache_but_not_in_base_store);
                Ok(RemoveResult::SuccessfullyRemoved)
            }
        }
    }

    /// Write the block to the base store if it has unflushed changes. Blocks released
    /// before are written first.
    pub async fn flush_block(&self, block: &mut Block<B>) -> Result<()> {
        self._wait_for_pending_write_backs().await?;
        let block_id = *block.block_id();
        write_back::flush_entry(
            &**self.base_store,
            &self.num_blocks_in_cache_but_not_in_base_store,
            &block_id,
            block._entry_mut(),
        )
        .await
    }

    async fn _wait_for_pending_write_backs(&self) -> Result<()> {
        let (done_sender, done) = oneshot::channel();
        if self
            .write_back
            .send(WriteBackJob::Barrier(done_sender))
            .is_err()
        {
            bail!("The write-back task isn't running anymore");
        }
        done.await
            .context("The write-back task stopped before finishing its jobs")
    }

    // Blocks created or removed concurrently may or may not be counted.
    pub async fn num_blocks(&self) -> Result<u64> {
        self._wait_for_pending_write_backs().await?;
        Ok(self.base_store.num_blocks().await?
            + self
                .num_blocks_in_cache_but_not_in_base_store
                .load(Ordering::SeqCst))
    }

    pub fn estimate_num_free_bytes(&self) -> Result<u64> {
        self.base_store.estimate_num_free_bytes()
    }

    pub fn block_size_from_physical_block_size(&self, block_size: u64) -> Result<u64> {
        self.base_store
            .block_size_from_physical_block_size(block_size)
    }

    // Blocks created or removed while the stream is running may or may not show up.
    pub async fn all_blocks(&self) -> Result<Pin<Box<dyn Stream<Item = Result<BlockId>> + Send>>> {
        self._wait_for_pending_write_backs().await?;
        let blocks_in_cache = self.cache.keys_with_entries_or_locked();
        let blocks_in_base_store = self.base_store.all_blocks().await?;

        let blocks_in_cache_set: HashSet<BlockId> = blocks_in_cache.iter().copied().collect();
        let blocks_in_base_store_and_not_in_cache = blocks_in_base_store
            .try_filter(move |block_id| future::ready(!blocks_in_cache_set.contains(block_id)));

        Ok(stream::iter(blocks_in_cache.into_iter().map(Ok))
            .chain(blocks_in_base_store_and_not_in_cache)
            .boxed())
    }

    /// Wait until all released blocks are written back, and retry the ones whose write-back
    /// failed. Waits for blocks that are currently held elsewhere, so don't call this while
    /// holding a [Block].
    pub async fn clear_cache(&self) -> Result<()> {
        self._wait_for_pending_write_backs().await?;
        let block_ids = self.cache.keys_with_entries_or_locked();
        let mut num_flushed = 0;
        for block_id in block_ids {
            let mut cache_entry = self._lock(block_id).await;
            if let Some(entry) = cache_entry.value_mut() {
                if entry.state() == CacheEntryState::Dirty {
                    num_flushed += 1;
                }
                write_back::flush_entry(
                    &**self.base_store,
                    &self.num_blocks_in_cache_but_not_in_base_store,
                    &block_id,
                    entry,
                )
                .await?;
                cache_entry.remove();
            }
        }
        if num_flushed > 0 {
            log::warn!("Cleared block cache, had to retry {} write-backs", num_flushed);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(super) fn num_cached_blocks(&self) -> usize {
        self.cache.keys_with_entries_or_locked().len()
    }
}

#[async_trait]
impl<B: BlockStore + Send + Sync + 'static> AsyncDrop for LockingBlockStore<B> {
    type Error = anyhow::Error;

    async fn async_drop_impl(&mut self) -> Result<()> {
        let flush_result = self.clear_cache().await;
        // Blocks still held after this lose their changes when released
        if self.write_back.send(WriteBackJob::Shutdown).is_err() {
            log::error!("The write-back task was already gone when tearing down the block store");
        }
        if let Some(writer) = self.writer.take() {
            writer.await.context("The write-back task panicked")?;
        }
        Arc::get_mut(&mut self.base_store)
            .ok_or_else(|| anyhow!("The base store is still in use after the write-back task finished"))?
            .async_drop()
            .await?;
        flush_result
    }
}

impl<B: BlockStore + Send + Sync + 'static> Debug for LockingBlockStore<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockingBlockStore")
            .field("base_store", &**self.base_store)
            .finish()
    }
}
