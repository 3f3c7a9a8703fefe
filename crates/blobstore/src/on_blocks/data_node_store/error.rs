use thiserror::Error;

use blocktree_blockstore::BlockId;

/// Failures of node operations that callers may want to tell apart. They travel inside an
/// [anyhow::Error]; use `downcast_ref::<NodeError>()` to inspect them.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum NodeError {
    #[error("Node {node_id:?} doesn't exist")]
    NotFound { node_id: BlockId },

    #[error("Node {node_id:?} is corrupt: {reason}")]
    Corrupt { node_id: BlockId, reason: String },

    #[error("Tried to store {requested} entries but there is only space for {capacity}")]
    CapacityExceeded { requested: u64, capacity: u64 },

    #[error("Tried to access index {index} but there are only {len} entries")]
    OutOfBounds { index: u64, len: u64 },

    #[error("Invariant violated: {reason}")]
    InvariantViolation { reason: String },
}

impl NodeError {
    pub(crate) fn corrupt(node_id: BlockId, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            node_id,
            reason: reason.into(),
        }
    }

    pub(crate) fn invariant_violation(reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
pub(crate) fn assert_node_error(expected: NodeError, actual: anyhow::Error) {
    match actual.downcast_ref::<NodeError>() {
        Some(actual) => assert_eq!(&expected, actual),
        None => panic!("Expected {:?} but got {:?}", expected, actual),
    }
}
