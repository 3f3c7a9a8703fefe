use std::fmt::Debug;
use std::ops::{Deref, DerefMut};

use super::AsyncDrop;

/// Owns a value that must be torn down with [AsyncDropGuard::async_drop].
///
/// Letting the guard go out of scope while it still holds its value is a bug and panics,
/// unless the thread is already unwinding, in which case the problem is only logged.
///
/// Types meant to live in an [AsyncDropGuard] should only offer constructors that
/// return the guard, so no unguarded instance can escape.
#[derive(Debug)]
pub struct AsyncDropGuard<T: Debug>(Option<T>);

impl<T: Debug> AsyncDropGuard<T> {
    pub fn new(value: T) -> Self {
        Self(Some(value))
    }

    /// Move the value out without tearing it down. The caller takes over responsibility for it.
    pub fn unsafe_into_inner_dont_drop(mut self) -> T {
        self.0.take().expect("Value already dropped")
    }
}

impl<T: Debug + AsyncDrop> AsyncDropGuard<T> {
    pub async fn async_drop(&mut self) -> Result<(), T::Error> {
        let mut value = self.0.take().expect("Value already dropped");
        value.async_drop_impl().await
    }
}

impl<T: Debug> Drop for AsyncDropGuard<T> {
    fn drop(&mut self) {
        if let Some(value) = &self.0 {
            if std::thread::panicking() {
                log::error!("Forgot to call async_drop on {:?}", value);
            } else {
                panic!("Forgot to call async_drop on {:?}", value);
            }
        }
    }
}

impl<T: Debug> Deref for AsyncDropGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.0.as_ref().expect("Value already dropped")
    }
}

impl<T: Debug> DerefMut for AsyncDropGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.0.as_mut().expect("Value already dropped")
    }
}
