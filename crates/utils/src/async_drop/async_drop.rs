use async_trait::async_trait;
use std::fmt::Debug;

/// Asynchronous counterpart of [Drop]. Only ever invoked through [super::AsyncDropGuard::async_drop].
#[async_trait]
pub trait AsyncDrop {
    type Error: Debug;

    /// Release the resources held by `self`. Runs before any synchronous [Drop] impl of the type.
    /// If this returns an error, the value is still considered dropped.
    async fn async_drop_impl(&mut self) -> Result<(), Self::Error>;
}
