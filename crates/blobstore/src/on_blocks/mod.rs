pub(crate) mod data_node_store;
mod data_tree_store;

pub use data_node_store::{
    DataInnerNode, DataLeafNode, DataNode, DataNodeStore, NodeError, NodeLayout, MAX_DEPTH,
};
pub use data_tree_store::{DataTree, DataTreeStore};
