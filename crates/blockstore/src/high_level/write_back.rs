use anyhow::Result;
use super::HashMapOwnedGuard;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::cache_entry::{BlockBaseStoreState, BlockCacheEntry, CacheEntryState};
use crate::low_level::BlockStore;
use crate::BlockId;
use blocktree_utils::async_drop::AsyncDropGuard;

pub(super) enum WriteBackJob {
    /// A released dirty block. The guard keeps it locked until it is written.
    Release(HashMapOwnedGuard<BlockId, BlockCacheEntry>),
    /// Answered once all jobs sent before it are done.
    Barrier(oneshot::Sender<()>),
    Shutdown,
}

pub(super) type WriteBackSender = mpsc::UnboundedSender<WriteBackJob>;

/// Writes released blocks to the base store, one at a time and in the order they were released.
///
/// A node is always released after the children it links to were released, so
/// children reach the base store before their parents do.
pub(super) fn spawn_writer<B: BlockStore + Send + Sync + 'static>(
    base_store: Arc<AsyncDropGuard<B>>,
    num_blocks_in_cache_but_not_in_base_store: Arc<AtomicU64>,
) -> (WriteBackSender, JoinHandle<()>) {
    let (sender, mut jobs) = mpsc::unbounded_channel();
    let writer = tokio::spawn(async move {
        while let Some(job) = jobs.recv().await {
            match job {
                WriteBackJob::Release(mut cache_entry) => {
                    let block_id = *cache_entry.key();
                    let Some(entry) = cache_entry.value_mut() else {
                        continue;
                    };
                    match flush_entry(
                        &**base_store,
                        &num_blocks_in_cache_but_not_in_base_store,
                        &block_id,
                        entry,
                    )
                    .await
                    {
                        Ok(()) => {
                            cache_entry.remove();
                        }
                        Err(err) => {
                            // Stays cached and dirty, the next clear_cache retries it
                            log::error!("Failed to write back {:?}: {:?}", block_id, err);
                        }
                    }
                }
                WriteBackJob::Barrier(done) => {
                    // Nobody waiting anymore is fine
                    let _ = done.send(());
                }
                WriteBackJob::Shutdown => break,
            }
        }
    });
    (sender, writer)
}

/// Hand a block that is being released over. Clean blocks are dropped from the cache right away.
pub(super) fn release(
    mut cache_entry: HashMapOwnedGuard<BlockId, BlockCacheEntry>,
    write_back: &WriteBackSender,
) {
    let is_dirty = cache_entry
        .value()
        .map_or(false, |entry| entry.state() == CacheEntryState::Dirty);
    if is_dirty {
        let block_id = *cache_entry.key();
        if write_back.send(WriteBackJob::Release(cache_entry)).is_err() {
            log::error!(
                "Released {:?} after the block store was torn down, its changes are lost",
                block_id
            );
        }
    } else {
        cache_entry.remove();
    }
}

/// Write the entry to the base store if it has unflushed changes.
pub(super) async fn flush_entry<B: BlockStore + Send + Sync + 'static>(
    base_store: &B,
    num_blocks_in_cache_but_not_in_base_store: &AtomicU64,
    block_id: &BlockId,
    entry: &mut BlockCacheEntry,
) -> Result<()> {
    if entry.state() == CacheEntryState::Dirty {
        base_store.store(block_id, entry.data()).await?;
        if entry.base_store_state() == BlockBaseStoreState::DoesntExistInBaseStore {
            decrement(num_blocks_in_cache_but_not_in_base_store);
        }
        entry.mark_flushed();
    }
    Ok(())
}

pub(super) fn decrement(num_blocks_in_cache_but_not_in_base_store: &AtomicU64) {
    let prev = num_blocks_in_cache_but_not_in_base_store.fetch_sub(1, Ordering::SeqCst);
    assert!(
        prev > 0,
        "Underflow in num_blocks_in_cache_but_not_in_base_store"
    );
}
