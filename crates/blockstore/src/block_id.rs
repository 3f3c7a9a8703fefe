use anyhow::{ensure, Result};
use rand::{thread_rng, Rng};

pub const BLOCKID_LEN: usize = 16;

/// Key of a block. Generated randomly, never derived from the block content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    id: [u8; BLOCKID_LEN],
}

impl BlockId {
    pub fn new_random() -> Self {
        let mut id = [0; BLOCKID_LEN];
        thread_rng().fill(&mut id);
        Self { id }
    }

    pub fn from_slice(id_data: &[u8]) -> Result<Self> {
        ensure!(
            id_data.len() == BLOCKID_LEN,
            "Tried to create a BlockId from {} bytes but it needs {}",
            id_data.len(),
            BLOCKID_LEN,
        );
        let mut id = [0; BLOCKID_LEN];
        id.copy_from_slice(id_data);
        Ok(Self { id })
    }

    #[inline]
    pub fn from_array(id: &[u8; BLOCKID_LEN]) -> Self {
        Self { id: *id }
    }

    #[inline]
    pub fn data(&self) -> &[u8; BLOCKID_LEN] {
        &self.id
    }

    pub fn from_hex(hex_data: &str) -> Result<Self> {
        Self::from_slice(&hex::decode(hex_data)?)
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.id)
    }
}

impl std::fmt::Debug for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockId({})", self.to_hex())
    }
}
