use blocktree_utils::data::Data;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CacheEntryState {
    Dirty,
    Clean,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockBaseStoreState {
    ExistsInBaseStore,
    DoesntExistInBaseStore,
}

/// A block as it is held in the [super::LockingBlockStore] cache.
#[derive(Debug)]
pub struct BlockCacheEntry {
    data: Data,
    state: CacheEntryState,
    base_store_state: BlockBaseStoreState,
}

impl BlockCacheEntry {
    pub fn new(data: Data, state: CacheEntryState, base_store_state: BlockBaseStoreState) -> Self {
        Self {
            data,
            state,
            base_store_state,
        }
    }

    #[inline]
    pub fn data(&self) -> &Data {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut Data {
        self.state = CacheEntryState::Dirty;
        &mut self.data
    }

    /// Replace the content and mark the entry dirty.
    pub fn overwrite(&mut self, data: Data) {
        self.data = data;
        self.state = CacheEntryState::Dirty;
    }

    /// Bytes added at the end are zero.
    pub fn resize(&mut self, new_size: usize) {
        let old_size = self.data.len();
        self.data.resize(new_size);
        if new_size > old_size {
            self.data[old_size..].fill(0);
        }
        self.state = CacheEntryState::Dirty;
    }

    #[inline]
    pub fn state(&self) -> CacheEntryState {
        self.state
    }

    #[inline]
    pub fn base_store_state(&self) -> BlockBaseStoreState {
        self.base_store_state
    }

    /// Called after the content was written to the base store.
    pub fn mark_flushed(&mut self) {
        self.state = CacheEntryState::Clean;
        self.base_store_state = BlockBaseStoreState::ExistsInBaseStore;
    }
}
