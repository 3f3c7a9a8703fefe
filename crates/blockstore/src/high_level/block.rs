use super::HashMapOwnedGuard;
use std::fmt::{self, Debug};
use std::marker::PhantomData;

use super::cache_entry::BlockCacheEntry;
use super::write_back::{self, WriteBackSender};
use crate::low_level::BlockStore;
use crate::BlockId;
use blocktree_utils::data::Data;

/// A loaded block. Nobody else can load, overwrite or remove this block while the [Block]
/// instance is alive.
///
/// Dropping the [Block] releases it. If it was modified, it stays locked until its new
/// content is written to the base store.
pub struct Block<B: BlockStore + Send + Sync + 'static> {
    // Only None after into_cache_entry
    cache_entry: Option<HashMapOwnedGuard<BlockId, BlockCacheEntry>>,
    write_back: WriteBackSender,
    _base_store: PhantomData<fn() -> B>,
}

impl<B: BlockStore + Send + Sync + 'static> Block<B> {
    pub(super) fn new(
        cache_entry: HashMapOwnedGuard<BlockId, BlockCacheEntry>,
        write_back: WriteBackSender,
    ) -> Self {
        assert!(
            cache_entry.value().is_some(),
            "A block can only be created for an existing cache entry"
        );
        Self {
            cache_entry: Some(cache_entry),
            write_back,
            _base_store: PhantomData,
        }
    }

    #[inline]
    pub fn block_id(&self) -> &BlockId {
        self._guard().key()
    }

    #[inline]
    pub fn data(&self) -> &Data {
        self._entry().data()
    }

    /// Gives write access and marks the block dirty.
    #[inline]
    pub fn data_mut(&mut self) -> &mut Data {
        self._entry_mut().data_mut()
    }

    pub fn resize(&mut self, new_size: usize) {
        self._entry_mut().resize(new_size);
    }

    fn _guard(&self) -> &HashMapOwnedGuard<BlockId, BlockCacheEntry> {
        self.cache_entry
            .as_ref()
            .expect("Block was already released")
    }

    pub(super) fn _entry(&self) -> &BlockCacheEntry {
        self._guard()
            .value()
            .expect("An existing block cannot have a None cache entry")
    }

    pub(super) fn _entry_mut(&mut self) -> &mut BlockCacheEntry {
        self.cache_entry
            .as_mut()
            .expect("Block was already released")
            .value_mut()
            .expect("An existing block cannot have a None cache entry")
    }

    /// Take the lock out without writing anything back.
    pub(super) fn into_cache_entry(mut self) -> HashMapOwnedGuard<BlockId, BlockCacheEntry> {
        self.cache_entry
            .take()
            .expect("Block was already released")
    }
}

impl<B: BlockStore + Send + Sync + 'static> Drop for Block<B> {
    fn drop(&mut self) {
        if let Some(cache_entry) = self.cache_entry.take() {
            write_back::release(cache_entry, &self.write_back);
        }
    }
}

impl<B: BlockStore + Send + Sync + 'static> Debug for Block<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("block_id", self.block_id())
            .field("state", &self._entry().state())
            .field("len", &self.data().len())
            .finish()
    }
}
