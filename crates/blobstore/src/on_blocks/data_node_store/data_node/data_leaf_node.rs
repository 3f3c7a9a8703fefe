use anyhow::{bail, Result};
use binary_layout::Field;

use super::super::{
    error::NodeError,
    layout::{node, NodeLayout, FORMAT_VERSION_HEADER},
};
use super::DataNode;
use blocktree_blockstore::{Block, BlockId, BlockStore, LockingBlockStore};
use blocktree_utils::data::Data;

#[derive(Debug)]
pub struct DataLeafNode<B: BlockStore + Send + Sync + 'static> {
    block: Block<B>,
}

impl<B: BlockStore + Send + Sync + 'static> DataLeafNode<B> {
    pub(super) fn new(block: Block<B>, layout: &NodeLayout) -> Result<Self> {
        assert!(
            layout.block_size_bytes as usize > node::data::OFFSET,
            "Block doesn't have enough space for header. This should have been checked before calling DataLeafNode::new"
        );
        let block_id = *block.block_id();
        if block.data().len() != layout.block_size_bytes as usize {
            bail!(NodeError::corrupt(
                block_id,
                format!(
                    "Loaded block of size {} but expected {}",
                    block.data().len(),
                    layout.block_size_bytes
                ),
            ));
        }
        let view = node::View::new(block.data().as_ref());
        if view.format_version_header().read() != FORMAT_VERSION_HEADER {
            bail!(NodeError::corrupt(
                block_id,
                format!(
                    "Loaded a node with format version {} but the current version is {}",
                    view.format_version_header().read(),
                    FORMAT_VERSION_HEADER,
                ),
            ));
        }
        assert_eq!(
            0,
            view.depth().read(),
            "Loaded a leaf with depth {}. This doesn't make sense, it should have been loaded as an inner node",
            view.depth().read(),
        );
        let max_bytes_per_leaf = layout.max_bytes_per_leaf();
        let size = view.size().read();
        if size > max_bytes_per_leaf {
            bail!(NodeError::corrupt(
                block_id,
                format!(
                    "Loaded a leaf that claims to store {} bytes but the maximum is {}",
                    size, max_bytes_per_leaf,
                ),
            ));
        }
        Ok(Self { block })
    }

    /// Create a new leaf in its own block. Fails without creating anything if `data` doesn't fit.
    pub async fn create_new_node(
        block_store: &LockingBlockStore<B>,
        layout: &NodeLayout,
        data: &[u8],
    ) -> Result<Self> {
        let block_data = serialize_leaf_node(data, layout)?;
        let block = block_store.create(&block_data).await?;
        Ok(Self { block })
    }

    /// Like [DataLeafNode::create_new_node] but with a given block id. Returns `None` if that id is taken.
    pub async fn try_create_new_node(
        block_store: &LockingBlockStore<B>,
        layout: &NodeLayout,
        block_id: &BlockId,
        data: &[u8],
    ) -> Result<Option<Self>> {
        let block_data = serialize_leaf_node(data, layout)?;
        Ok(block_store
            .try_create(block_id, &block_data)
            .await?
            .map(|block| Self { block }))
    }

    pub fn block_id(&self) -> &BlockId {
        self.block.block_id()
    }

    pub(super) fn raw_blockdata(&self) -> &Data {
        self.block.data()
    }

    pub(super) fn into_block(self) -> Block<B> {
        self.block
    }

    pub(super) fn as_block_mut(&mut self) -> &mut Block<B> {
        &mut self.block
    }

    pub fn num_bytes(&self) -> u32 {
        node::View::new(self.block.data().as_ref()).size().read()
    }

    pub fn max_bytes_per_leaf(&self) -> u32 {
        (self.block.data().len() - node::data::OFFSET) as u32
    }

    /// Shrinking zero-fills the freed tail, so growing again never resurfaces old bytes.
    pub fn resize(&mut self, new_num_bytes: u32) -> Result<()> {
        let max_bytes_per_leaf = self.max_bytes_per_leaf();
        if new_num_bytes > max_bytes_per_leaf {
            bail!(NodeError::CapacityExceeded {
                requested: u64::from(new_num_bytes),
                capacity: u64::from(max_bytes_per_leaf),
            });
        }
        let old_num_bytes = self.num_bytes();
        let (begin, end) = if new_num_bytes < old_num_bytes {
            (new_num_bytes, old_num_bytes)
        } else {
            (old_num_bytes, new_num_bytes)
        };
        self._payload_mut()[begin as usize..end as usize].fill(0);
        node::View::new(self.block.data_mut().as_mut())
            .size_mut()
            .write(new_num_bytes);
        Ok(())
    }

    /// The used part of the payload.
    pub fn data(&self) -> &[u8] {
        let num_bytes = self.num_bytes() as usize;
        &self.block.data()[node::data::OFFSET..][..num_bytes]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let num_bytes = self.num_bytes() as usize;
        &mut self._payload_mut()[..num_bytes]
    }

    fn _payload_mut(&mut self) -> &mut [u8] {
        &mut self.block.data_mut()[node::data::OFFSET..]
    }

    /// Fails with [NodeError::OutOfBounds] if the range isn't within the used size.
    pub fn read(&self, offset: u32, size: u32) -> Result<&[u8]> {
        let num_bytes = self.num_bytes();
        let end = u64::from(offset) + u64::from(size);
        if end > u64::from(num_bytes) {
            bail!(NodeError::OutOfBounds {
                index: end,
                len: u64::from(num_bytes),
            });
        }
        Ok(&self.data()[offset as usize..end as usize])
    }

    /// Writing past the used size grows the leaf, zero-filling any gap. Fails with
    /// [NodeError::CapacityExceeded] and leaves the leaf untouched if it wouldn't fit.
    pub fn write(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        let max_bytes_per_leaf = self.max_bytes_per_leaf();
        let end = u64::from(offset) + data.len() as u64;
        if end > u64::from(max_bytes_per_leaf) {
            bail!(NodeError::CapacityExceeded {
                requested: end,
                capacity: u64::from(max_bytes_per_leaf),
            });
        }
        let end = end as u32;
        if end > self.num_bytes() {
            self.resize(end)?;
        }
        self.data_mut()[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    pub fn upcast(self) -> DataNode<B> {
        DataNode::Leaf(self)
    }
}

/// Serialize a full leaf block. Fails with [NodeError::CapacityExceeded] if `data` doesn't fit.
pub fn serialize_leaf_node(data: &[u8], layout: &NodeLayout) -> Result<Data> {
    let max_bytes_per_leaf = layout.max_bytes_per_leaf();
    if data.len() as u64 > u64::from(max_bytes_per_leaf) {
        bail!(NodeError::CapacityExceeded {
            requested: data.len() as u64,
            capacity: u64::from(max_bytes_per_leaf),
        });
    }
    let mut payload = allocate_leaf_payload(layout);
    payload[..data.len()].copy_from_slice(data);
    Ok(serialize_leaf_node_optimized(
        payload,
        data.len() as u32,
        layout,
    ))
}

/// A zeroed buffer of `max_bytes_per_leaf` bytes with enough prefix bytes reserved to
/// prepend the header without reallocating.
pub fn allocate_leaf_payload(layout: &NodeLayout) -> Data {
    let mut data = Data::from(vec![0; layout.block_size_bytes as usize]);
    data.shrink_to_subregion(node::data::OFFSET..);
    data
}

// `data` must be the size of the full leaf, even if the leaf uses fewer bytes, and everything after `num_bytes` must be zero.
pub fn serialize_leaf_node_optimized(mut data: Data, num_bytes: u32, layout: &NodeLayout) -> Data {
    assert_eq!(layout.max_bytes_per_leaf() as usize, data.len());
    assert!(
        num_bytes <= layout.max_bytes_per_leaf(),
        "Tried to create leaf with {} bytes but each leaf can only hold {}",
        num_bytes,
        layout.max_bytes_per_leaf()
    );
    assert!(
        data.available_prefix_bytes() >= node::data::OFFSET,
        "Data objects passed to serialize_leaf_node_optimized must have at least {} prefix bytes available, but only had {}",
        node::data::OFFSET,
        data.available_prefix_bytes()
    );
    data.grow_region_fail_if_reallocation_necessary(node::data::OFFSET, 0)
        .expect("We just checked that enough prefix bytes are available");
    let mut view = node::View::new(data.as_mut());
    view.format_version_header_mut().write(FORMAT_VERSION_HEADER);
    view.unused_mut().write(0);
    view.depth_mut().write(0);
    view.size_mut().write(num_bytes);
    // The payload is already in place because we grew the region in front of it
    data
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::super::super::error::assert_node_error;
    use super::super::super::testutils::*;
    use super::*;

    mod new {
        use super::*;

        #[tokio::test]
        async fn whenLoadingFullLeafNode_thenSucceeds() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node = new_full_leaf_node(nodestore).await;

                    let block = node.into_block();
                    let node = DataLeafNode::new(block, nodestore.layout()).unwrap();

                    assert_eq!(
                        nodestore.layout().max_bytes_per_leaf() as usize,
                        node.data().len(),
                    );
                })
            })
            .await;
        }

        #[tokio::test]
        async fn whenLoadingEmptyLeafNode_thenSucceeds() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node = new_empty_leaf_node(nodestore).await;

                    let block = node.into_block();
                    let node = DataLeafNode::new(block, nodestore.layout()).unwrap();

                    assert_eq!(0, node.data().len());
                })
            })
            .await;
        }

        #[tokio::test]
        async fn whenLoadingLeafWithWrongFormatVersion_thenFailsAsCorrupt() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node = new_full_leaf_node(nodestore).await;
                    let node_id = *node.block_id();

                    let mut block = node.into_block();
                    node::View::new(block.data_mut().as_mut())
                        .format_version_header_mut()
                        .write(10);

                    assert_node_error(
                        NodeError::Corrupt {
                            node_id,
                            reason: String::from(
                                "Loaded a node with format version 10 but the current version is 0",
                            ),
                        },
                        DataLeafNode::new(block, nodestore.layout()).unwrap_err(),
                    );
                })
            })
            .await;
        }

        #[tokio::test]
        #[should_panic = "Loaded a leaf with depth 1. This doesn't make sense, it should have been loaded as an inner node"]
        async fn whenLoadingInnerNodeAsLeaf_thenPanics() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node = new_inner_node(nodestore).await;
                    let _ = DataLeafNode::new(node.into_block(), nodestore.layout());
                })
            })
            .await;
        }

        #[tokio::test]
        async fn whenLoadingTooSmallLeafNode_thenFails() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node = new_empty_leaf_node(nodestore).await;
                    let node_id = *node.block_id();

                    let mut block = node.into_block();
                    let len = block.data().len();
                    block.resize(len - 1);

                    assert_node_error(
                        NodeError::Corrupt {
                            node_id,
                            reason: String::from("Loaded block of size 1023 but expected 1024"),
                        },
                        DataLeafNode::new(block, nodestore.layout()).unwrap_err(),
                    );
                })
            })
            .await
        }

        #[tokio::test]
        async fn whenLoadingLeafThatClaimsTooManyBytes_thenFails() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node = new_empty_leaf_node(nodestore).await;
                    let node_id = *node.block_id();

                    let mut block = node.into_block();
                    node::View::new(block.data_mut().as_mut())
                        .size_mut()
                        .write(1017);

                    assert_node_error(
                        NodeError::Corrupt {
                            node_id,
                            reason: String::from(
                                "Loaded a leaf that claims to store 1017 bytes but the maximum is 1016",
                            ),
                        },
                        DataLeafNode::new(block, nodestore.layout()).unwrap_err(),
                    );
                })
            })
            .await
        }
    }

    mod create_new_node {
        use super::*;

        #[tokio::test]
        async fn givenTooMuchData_thenFailsWithCapacityExceeded() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let num_nodes_before = nodestore.num_nodes().await.unwrap();
                    let err = nodestore
                        .create_new_leaf_node(&data_fixture(1017, 0))
                        .await
                        .unwrap_err();
                    assert_node_error(
                        NodeError::CapacityExceeded {
                            requested: 1017,
                            capacity: 1016,
                        },
                        err,
                    );
                    assert_eq!(num_nodes_before, nodestore.num_nodes().await.unwrap());
                })
            })
            .await
        }

        #[tokio::test]
        async fn unusedPayloadIsZero() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node = nodestore
                        .create_new_leaf_node(&half_full_leaf_data(1))
                        .await
                        .unwrap();
                    let used = node::data::OFFSET + half_full_leaf_data(1).len();
                    assert!(node.raw_blockdata()[used..].iter().all(|b| *b == 0));
                })
            })
            .await
        }
    }

    mod resize {
        use super::*;

        #[tokio::test]
        async fn shrinkThenGrow_doesntResurfaceOldBytes() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let mut node = new_full_leaf_node(nodestore).await;
                    node.resize(100).unwrap();
                    assert_eq!(&full_leaf_data(1)[..100], node.data());
                    node.resize(200).unwrap();
                    assert_eq!(&full_leaf_data(1)[..100], &node.data()[..100]);
                    assert_eq!(&[0u8; 100][..], &node.data()[100..]);
                })
            })
            .await
        }

        #[tokio::test]
        async fn shrinkToZero() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let mut node = new_full_leaf_node(nodestore).await;
                    node.resize(0).unwrap();
                    assert_eq!(0, node.num_bytes());
                    assert!(node.raw_blockdata()[node::data::OFFSET..]
                        .iter()
                        .all(|b| *b == 0));
                })
            })
            .await
        }

        #[tokio::test]
        async fn growBeyondCapacity_fails() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let mut node = new_empty_leaf_node(nodestore).await;
                    assert_node_error(
                        NodeError::CapacityExceeded {
                            requested: 1017,
                            capacity: 1016,
                        },
                        node.resize(1017).unwrap_err(),
                    );
                    assert_eq!(0, node.num_bytes());
                })
            })
            .await
        }

        #[tokio::test]
        async fn resizedLeaf_keepsSizeAfterReload() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let mut node = new_full_leaf_node(nodestore).await;
                    let node_id = *node.block_id();
                    node.resize(300).unwrap();
                    drop(node);
                    nodestore.clear_cache().await.unwrap();

                    let node = load_leaf_node(nodestore, node_id).await;
                    assert_eq!(300, node.num_bytes());
                    assert_eq!(&full_leaf_data(1)[..300], node.data());
                })
            })
            .await
        }
    }

    mod read_write {
        use super::*;
        use rstest::rstest;

        #[rstest]
        #[case::at_start(0, 100)]
        #[case::in_middle(300, 200)]
        #[case::up_to_end(916, 100)]
        #[case::whole_leaf(0, 1016)]
        #[case::empty(500, 0)]
        #[tokio::test]
        async fn writeThenRead_returnsWrittenData(#[case] offset: u32, #[case] size: usize) {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let mut node = new_full_leaf_node(nodestore).await;
                    node.write(offset, &data_fixture(size, 5)).unwrap();
                    assert_eq!(
                        &data_fixture(size, 5)[..],
                        node.read(offset, size as u32).unwrap()
                    );
                    assert_eq!(1016, node.num_bytes());
                })
            })
            .await
        }

        #[tokio::test]
        async fn writePastUsedSize_growsAndZeroFillsGap() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let mut node = new_empty_leaf_node(nodestore).await;
                    node.write(100, &data_fixture(50, 0)).unwrap();
                    assert_eq!(150, node.num_bytes());
                    assert_eq!(&[0u8; 100][..], node.read(0, 100).unwrap());
                    assert_eq!(&data_fixture(50, 0)[..], node.read(100, 50).unwrap());
                })
            })
            .await
        }

        #[tokio::test]
        async fn writePastCapacity_failsAndDoesntModify() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let mut node = nodestore
                        .create_new_leaf_node(&half_full_leaf_data(1))
                        .await
                        .unwrap();
                    assert_node_error(
                        NodeError::CapacityExceeded {
                            requested: 1017,
                            capacity: 1016,
                        },
                        node.write(1000, &data_fixture(17, 0)).unwrap_err(),
                    );
                    assert_eq!(&half_full_leaf_data(1)[..], node.data());
                })
            })
            .await
        }

        #[tokio::test]
        async fn readPastUsedSize_fails() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let node = nodestore
                        .create_new_leaf_node(&data_fixture(100, 0))
                        .await
                        .unwrap();
                    assert_node_error(
                        NodeError::OutOfBounds { index: 101, len: 100 },
                        node.read(50, 51).unwrap_err(),
                    );
                })
            })
            .await
        }

        #[tokio::test]
        async fn writtenData_survivesReload() {
            with_nodestore(|nodestore| {
                Box::pin(async move {
                    let mut node = new_empty_leaf_node(nodestore).await;
                    let node_id = *node.block_id();
                    node.write(10, &data_fixture(500, 3)).unwrap();
                    drop(node);
                    nodestore.clear_cache().await.unwrap();

                    let node = load_leaf_node(nodestore, node_id).await;
                    assert_eq!(&data_fixture(500, 3)[..], node.read(10, 500).unwrap());
                })
            })
            .await
        }
    }

    mod serialize_leaf_node {
        use super::*;

        #[test]
        fn writesHeader() {
            let layout = NodeLayout {
                block_size_bytes: PHYSICAL_BLOCK_SIZE_BYTES,
            };
            let data = serialize_leaf_node(&data_fixture(10, 0), &layout).unwrap();
            assert_eq!(PHYSICAL_BLOCK_SIZE_BYTES as usize, data.len());
            let view = node::View::new(data.as_ref());
            assert_eq!(FORMAT_VERSION_HEADER, view.format_version_header().read());
            assert_eq!(0, view.depth().read());
            assert_eq!(10, view.size().read());
            assert_eq!(&data_fixture(10, 0)[..], &data[8..18]);
        }
    }
}
