use anyhow::{bail, Result};
use binary_layout::Field;
use std::num::{NonZeroU32, NonZeroU8};

use super::super::{
    error::NodeError,
    layout::{node, NodeLayout, FORMAT_VERSION_HEADER, MAX_DEPTH},
};
use super::DataNode;
use blocktree_blockstore::{Block, BlockId, BlockStore, LockingBlockStore, BLOCKID_LEN};
use blocktree_utils::data::{Data, ZeroedData};

/// A node of depth >= 1 storing references to its children by [BlockId].
///
/// The node never holds a handle to a child, children have to be loaded
/// through the [DataNodeStore](super::super::DataNodeStore).
#[derive(Debug)]
pub struct DataInnerNode<B: BlockStore + Send + Sync + 'static> {
    block: Block<B>,
}

impl<B: BlockStore + Send + Sync + 'static> DataInnerNode<B> {
    pub(super) fn new(block: Block<B>, layout: &NodeLayout) -> Result<Self> {
        assert!(
            layout.block_size_bytes as usize >= NodeLayout::min_block_size_bytes(),
            "Block doesn't have enough space for header and two children. This should have been checked before calling DataInnerNode::new"
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
        let depth = view.depth().read();
        assert_ne!(
            0, depth,
            "Loaded an inner node with depth 0. This doesn't make sense, it should have been loaded as a leaf node",
        );
        if depth > MAX_DEPTH {
            bail!(NodeError::corrupt(
                block_id,
                format!(
                    "Loaded an inner node with depth {} but the maximum is {}",
                    depth, MAX_DEPTH,
                ),
            ));
        }
        let size = view.size().read();
        if size == 0 {
            bail!(NodeError::corrupt(
                block_id,
                "Loaded an inner node that claims to store 0 children but the minimum is 1",
            ));
        }
        let max_children_per_inner_node = layout.max_children_per_inner_node();
        if size > max_children_per_inner_node {
            bail!(NodeError::corrupt(
                block_id,
                format!(
                    "Loaded an inner node that claims to store {} children but the maximum is {}",
                    size, max_children_per_inner_node,
                ),
            ));
        }
        Ok(Self { block })
    }

    /// Create a new inner node in its own block. Nothing is created if the arguments are invalid.
    ///
    /// Doesn't check that the children exist or have depth `depth - 1`, that's up to the caller.
    pub async fn create_new_node(
        block_store: &LockingBlockStore<B>,
        layout: &NodeLayout,
        depth: u8,
        children: &[BlockId],
    ) -> Result<Self> {
        check_new_inner_node(depth, children, layout)?;
        let block_data = serialize_inner_node(depth, children, layout);
        let block = block_store.create(&block_data).await?;
        Ok(Self { block })
    }

    pub fn depth(&self) -> NonZeroU8 {
        let view = node::View::new(self.block.data().as_ref());
        NonZeroU8::new(view.depth().read())
            .expect("DataInnerNode class invariant violated: Has depth of zero")
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

    pub fn num_children(&self) -> NonZeroU32 {
        let view = node::View::new(self.block.data().as_ref());
        NonZeroU32::new(view.size().read())
            .expect("DataInnerNode class invariant violated: Has only zero children")
    }

    /// Child ids in storage order. Call again to restart.
    pub fn children(&self) -> impl Iterator<Item = BlockId> + ExactSizeIterator + Clone + '_ {
        let num_children = self.num_children().get() as usize;
        let children_ids = self.block.data()[node::data::OFFSET..].chunks_exact(BLOCKID_LEN);
        assert!(
            num_children <= children_ids.len(),
            "Class invariant violated: Tried to load an inner node with {} children but support at most {} per inner node",
            num_children,
            children_ids.len(),
        );
        children_ids.take(num_children).map(_parse_block_id)
    }

    /// Fails with [NodeError::OutOfBounds] if `index >= num_children()`.
    pub fn read_child(&self, index: u32) -> Result<BlockId> {
        let num_children = self.num_children().get();
        if index >= num_children {
            bail!(NodeError::OutOfBounds {
                index: u64::from(index),
                len: u64::from(num_children),
            });
        }
        Ok(_parse_block_id(self._child_raw(index as usize)))
    }

    /// Tree growth always happens at the right border, so this is the hot path when descending.
    /// Can't fail because a loaded inner node always has at least one child.
    pub fn read_last_child(&self) -> BlockId {
        let last_index = self.num_children().get() - 1;
        _parse_block_id(self._child_raw(last_index as usize))
    }

    fn _child_raw(&self, index: usize) -> &[u8] {
        let begin = node::data::OFFSET + index * BLOCKID_LEN;
        &self.block.data()[begin..begin + BLOCKID_LEN]
    }

    fn _children_mut_raw(&mut self) -> &mut [u8] {
        &mut self.block.data_mut()[node::data::OFFSET..]
    }

    /// Append a child. Fails without modifying the node if the child has the wrong depth or the node is full.
    pub fn add_child(&mut self, child: &DataNode<B>) -> Result<()> {
        let depth = self.depth().get();
        if child.depth() != depth - 1 {
            bail!(NodeError::invariant_violation(format!(
                "Tried to add a child of depth {} to an inner node of depth {}",
                child.depth(),
                depth,
            )));
        }
        let prev_num_children = self.num_children().get();
        let max_children = self._max_children();
        if prev_num_children >= max_children {
            bail!(NodeError::CapacityExceeded {
                requested: u64::from(prev_num_children) + 1,
                capacity: u64::from(max_children),
            });
        }
        let begin = prev_num_children as usize * BLOCKID_LEN;
        self._children_mut_raw()[begin..begin + BLOCKID_LEN].copy_from_slice(child.block_id().data());
        node::View::new(self.block.data_mut().as_mut())
            .size_mut()
            .write(prev_num_children + 1);
        Ok(())
    }

    /// Detach the last child and return its id. The child block itself isn't touched.
    /// An inner node can't go down to zero children, remove the node itself instead.
    pub fn remove_last_child(&mut self) -> Result<BlockId> {
        let num_children = self.num_children().get();
        let Some(new_num_children) = NonZeroU32::new(num_children - 1) else {
            bail!(NodeError::invariant_violation(format!(
                "Tried to remove the last child of inner node {:?} which only has one child left",
                self.block_id(),
            )));
        };
        let last_child = self.read_last_child();
        self.shrink_num_children(new_num_children)?;
        Ok(last_child)
    }

    /// Drop all children from `new_num_children` on, zero-filling the freed slots.
    pub fn shrink_num_children(&mut self, new_num_children: NonZeroU32) -> Result<()> {
        let old_num_children = self.num_children().get();
        if new_num_children.get() > old_num_children {
            bail!(NodeError::invariant_violation(format!(
                "Called DataInnerNode::shrink_num_children({}) for a node with {} children",
                new_num_children, old_num_children,
            )));
        }
        let free_begin = new_num_children.get() as usize * BLOCKID_LEN;
        let free_end = old_num_children as usize * BLOCKID_LEN;
        self._children_mut_raw()[free_begin..free_end].fill(0);
        node::View::new(self.block.data_mut().as_mut())
            .size_mut()
            .write(new_num_children.get());
        Ok(())
    }

    /// Replace the whole child array. Fails without modifying the node if `children` is empty or too long.
    pub fn write(&mut self, children: &[BlockId]) -> Result<()> {
        _check_num_children(children.len(), self._max_children())?;
        let dest = self._children_mut_raw();
        dest.fill(0);
        _serialize_children(dest, children);
        node::View::new(self.block.data_mut().as_mut())
            .size_mut()
            .write(children.len() as u32);
        Ok(())
    }

    fn _max_children(&self) -> u32 {
        ((self.block.data().len() - node::data::OFFSET) / BLOCKID_LEN) as u32
    }

    pub fn upcast(self) -> DataNode<B> {
        DataNode::Inner(self)
    }
}

fn _parse_block_id(id_bytes: &[u8]) -> BlockId {
    let id: &[u8; BLOCKID_LEN] = id_bytes
        .try_into()
        .expect("Child ids are always read as chunks of BLOCKID_LEN bytes");
    BlockId::from_array(id)
}

fn _check_num_children(num_children: usize, max_children: u32) -> Result<()> {
    if num_children == 0 {
        bail!(NodeError::invariant_violation(
            "An inner node must have at least one child"
        ));
    }
    if num_children as u64 > u64::from(max_children) {
        bail!(NodeError::CapacityExceeded {
            requested: num_children as u64,
            capacity: u64::from(max_children),
        });
    }
    Ok(())
}

/// The recoverable version of the asserts in [initialize_inner_node].
pub(in super::super) fn check_new_inner_node(
    depth: u8,
    children: &[BlockId],
    layout: &NodeLayout,
) -> Result<()> {
    if depth == 0 {
        bail!(NodeError::invariant_violation(
            "Inner node cannot have a depth of 0. Is this perhaps a leaf instead?"
        ));
    }
    if depth > MAX_DEPTH {
        bail!(NodeError::invariant_violation(format!(
            "Inner node cannot have a depth of {}, the maximum is {}",
            depth, MAX_DEPTH,
        )));
    }
    _check_num_children(children.len(), layout.max_children_per_inner_node())
}

pub fn serialize_inner_node(depth: u8, children: &[BlockId], layout: &NodeLayout) -> Data {
    let data = ZeroedData::new(layout.block_size_bytes as usize);
    initialize_inner_node(depth, children, layout, data)
}

pub fn initialize_inner_node<D>(
    depth: u8,
    children: &[BlockId],
    layout: &NodeLayout,
    dest: ZeroedData<D>,
) -> D
where
    D: AsRef<[u8]> + AsMut<[u8]>,
{
    assert!(
        depth != 0,
        "Inner node cannot have a depth of 0. Is this perhaps a leaf instead?"
    );
    assert!(
        depth <= MAX_DEPTH,
        "Inner node cannot have a depth of {}, the maximum is {}",
        depth,
        MAX_DEPTH,
    );
    assert!(
        !children.is_empty(),
        "Inner node must have at least one child"
    );
    assert!(
        children.len() <= layout.max_children_per_inner_node() as usize,
        "Inner nodes can only store {} children but tried to store {}",
        layout.max_children_per_inner_node(),
        children.len(),
    );

    let mut view = node::View::new(dest.into_inner());
    view.format_version_header_mut()
        .write(FORMAT_VERSION_HEADER);
    view.unused_mut().write(0);
    view.depth_mut().write(depth);
    view.size_mut().write(children.len() as u32);
    _serialize_children(view.data_mut(), children);
    view.into_storage()
}

fn _serialize_children(dest: &mut [u8], children: &[BlockId]) {
    assert!(
        dest.len() >= children.len() * BLOCKID_LEN,
        "Serializing {} children requires {} bytes but tried to serialize into a buffer with {} bytes.",
        children.len(),
        children.len() * BLOCKID_LEN,
        dest.len()
    );
    for (child, dest) in children.iter().zip(dest.chunks_exact_mut(BLOCKID_LEN)) {
        dest.copy_from_slice(child.data());
    }
}
