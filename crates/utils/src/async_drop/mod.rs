//! Explicit asynchronous teardown.
//!
//! Rust has no async destructors, so types that need to flush or close something
//! asynchronously implement [AsyncDrop] and are only ever handed out wrapped in an
//! [AsyncDropGuard]. The guard insists that its owner awaits [AsyncDropGuard::async_drop].

mod async_drop;
pub use async_drop::AsyncDrop;

mod async_drop_guard;
pub use async_drop_guard::AsyncDropGuard;
