pub mod async_drop;
pub mod data;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;
