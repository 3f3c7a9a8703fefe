mod size_cache;
mod store;
mod traversal;
mod tree;

#[cfg(test)]
mod testutils;

pub use store::DataTreeStore;
pub use tree::DataTree;
