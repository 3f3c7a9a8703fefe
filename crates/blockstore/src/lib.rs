mod block_id;
pub use block_id::{BlockId, BLOCKID_LEN};

mod low_level;
pub use low_level::{
    BlockStore, BlockStoreDeleter, BlockStoreReader, BlockStoreWriter, InMemoryBlockStore,
    OnDiskBlockStore, RemoveResult, TryCreateResult,
};

mod high_level;
pub use high_level::{Block, LockingBlockStore};
