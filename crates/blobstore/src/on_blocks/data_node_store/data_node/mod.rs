mod data_inner_node;
mod data_leaf_node;
#[allow(clippy::module_inception)]
mod data_node;

pub use data_inner_node::DataInnerNode;
pub use data_leaf_node::DataLeafNode;
pub(super) use data_leaf_node::serialize_leaf_node;
pub use data_node::DataNode;
