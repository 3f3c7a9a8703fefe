//! Blocks handed out by a [LockingBlockStore] are exclusively locked while the caller holds
//! them. Changes are written to the underlying store when the block is released, in release order.

mod block;
mod cache_entry;
mod locking_blockstore;
mod write_back;

/// Owned guard type of a `lockable::LockableHashMap` entry.
type HashMapOwnedGuard<K, V> =
    <lockable::LockableHashMap<K, V> as lockable::Lockable<K, V>>::OwnedGuard;

pub use block::Block;
pub use locking_blockstore::LockingBlockStore;
