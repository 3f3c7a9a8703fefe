use anyhow::{anyhow, bail, Context, Error, Result};
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use std::fmt::{self, Debug};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs::DirEntry;
use tokio_stream::wrappers::ReadDirStream;

use super::{
    BlockStore, BlockStoreDeleter, BlockStoreReader, BlockStoreWriter, RemoveResult,
    TryCreateResult,
};
use crate::{BlockId, BLOCKID_LEN};
use blocktree_utils::{
    async_drop::{AsyncDrop, AsyncDropGuard},
    data::Data,
};

mod sysinfo;

const FORMAT_VERSION_HEADER_PREFIX: &[u8] = b"blocktree;block;";
const FORMAT_VERSION_HEADER: &[u8] = b"blocktree;block;0\0";

const PREFIX_LEN: usize = 3;
const NONPREFIX_LEN: usize = 2 * BLOCKID_LEN - PREFIX_LEN;

/// Stores each block as a file `basedir/XXX/YYYYYYYYYYYYYYYYYYYYYYYYYYYYY`, where `XXX` are the
/// first three hex characters of the block id and `YYY...` the rest. Every file starts with a
/// format version header.
pub struct OnDiskBlockStore {
    basedir: PathBuf,
}

impl OnDiskBlockStore {
    pub fn new(basedir: PathBuf) -> AsyncDropGuard<Self> {
        AsyncDropGuard::new(Self { basedir })
    }
}

#[async_trait]
impl BlockStoreReader for OnDiskBlockStore {
    async fn exists(&self, id: &BlockId) -> Result<bool> {
        path_exists(&self._block_path(id)).await
    }

    async fn load(&self, id: &BlockId) -> Result<Option<Data>> {
        let path = self._block_path(id);
        match tokio::fs::read(&path).await {
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to open block file at {}", path.display()))
            }
            Ok(file_content) => {
                let block_content =
                    _check_and_remove_header(file_content.into()).with_context(|| {
                        format!(
                            "Failed to parse file contents of block at {}",
                            path.display()
                        )
                    })?;
                Ok(Some(block_content))
            }
        }
    }

    async fn num_blocks(&self) -> Result<u64> {
        self._all_block_files()
            .await?
            .try_fold(0, |acc, _blockfile| futures::future::ready(Ok(acc + 1)))
            .await
    }

    fn estimate_num_free_bytes(&self) -> Result<u64> {
        sysinfo::get_available_disk_space(&self.basedir)
    }

    fn block_size_from_physical_block_size(&self, block_size: u64) -> Result<u64> {
        block_size
            .checked_sub(FORMAT_VERSION_HEADER.len() as u64)
            .with_context(|| {
                anyhow!(
                    "Physical block size of {} is too small to store the format version header. Must be at least {}.",
                    block_size,
                    FORMAT_VERSION_HEADER.len(),
                )
            })
    }

    async fn all_blocks(&self) -> Result<Pin<Box<dyn Stream<Item = Result<BlockId>> + Send>>> {
        Ok(self
            ._all_block_files()
            .await?
            .and_then(|entry| futures::future::ready(_blockid_from_filepath(&entry.path())))
            .boxed())
    }
}

#[async_trait]
impl BlockStoreWriter for OnDiskBlockStore {
    async fn try_create(&self, id: &BlockId, data: &[u8]) -> Result<TryCreateResult> {
        let path = self._block_path(id);
        if path_exists(&path).await? {
            Ok(TryCreateResult::NotCreatedBecauseBlockIdAlreadyExists)
        } else {
            _store(&path, data).await?;
            Ok(TryCreateResult::SuccessfullyCreated)
        }
    }

    async fn store(&self, id: &BlockId, data: &[u8]) -> Result<()> {
        _store(&self._block_path(id), data).await
    }
}

#[async_trait]
impl BlockStoreDeleter for OnDiskBlockStore {
    async fn remove(&self, id: &BlockId) -> Result<RemoveResult> {
        let path = self._block_path(id);
        match tokio::fs::remove_file(&path).await {
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Ok(RemoveResult::NotRemovedBecauseItDoesntExist)
            }
            Ok(()) => Ok(RemoveResult::SuccessfullyRemoved),
            Err(err) => Err(err)
                .with_context(|| format!("Failed to remove block file at {}", path.display())),
        }
    }
}

async fn path_exists(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

impl Debug for OnDiskBlockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnDiskBlockStore({})", self.basedir.display())
    }
}

#[async_trait]
impl AsyncDrop for OnDiskBlockStore {
    type Error = anyhow::Error;
    async fn async_drop_impl(&mut self) -> Result<()> {
        Ok(())
    }
}

impl BlockStore for OnDiskBlockStore {}

impl OnDiskBlockStore {
    fn _block_path(&self, block_id: &BlockId) -> PathBuf {
        _block_path(&self.basedir, block_id)
    }

    async fn _all_block_files(&self) -> Result<impl Stream<Item = Result<DirEntry>>> {
        let basedir_entries = match tokio::fs::read_dir(&self.basedir).await {
            Ok(entries) => entries,
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Failed to list base directory {}", self.basedir.display())
                })
            }
        };
        Ok(ReadDirStream::new(basedir_entries)
            .map_err(Error::from)
            .try_filter_map(|subdir| async move {
                if subdir.metadata().await?.is_dir() && _is_blockid_part(&subdir, PREFIX_LEN)? {
                    let entries_stream =
                        ReadDirStream::new(tokio::fs::read_dir(subdir.path()).await?)
                            .map_err(Error::from);
                    Ok(Some(entries_stream))
                } else {
                    // Not a block directory, skip it.
                    Ok(None)
                }
            })
            .try_flatten()
            .try_filter_map(|blockfile| async move {
                if _is_blockid_part(&blockfile, NONPREFIX_LEN)? {
                    Ok(Some(blockfile))
                } else {
                    Ok(None)
                }
            }))
    }
}

fn _is_blockid_part(entry: &DirEntry, expected_len: usize) -> Result<bool> {
    let file_name = entry.file_name();
    let file_name = file_name.to_str().ok_or_else(|| {
        anyhow!(
            "Invalid UTF-8 in path in base directory: {}",
            entry.path().display()
        )
    })?;
    Ok(file_name.len() == expected_len && file_name.chars().all(_is_allowed_blockid_character))
}

fn _blockid_from_filepath(path: &Path) -> Result<BlockId> {
    let component = |p: Option<&Path>| -> Result<String> {
        p.and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("Block file path {} is malformed", path.display()))
    };
    let blockid_prefix = component(path.parent())?;
    let blockid_nonprefix = component(Some(path))?;
    BlockId::from_hex(&format!("{}{}", blockid_prefix, blockid_nonprefix))
        .with_context(|| format!("Block file path {} cannot be parsed as hex", path.display()))
}

fn _check_and_remove_header(mut data: Data) -> Result<Data> {
    if !data.starts_with(FORMAT_VERSION_HEADER) {
        if data.starts_with(FORMAT_VERSION_HEADER_PREFIX) {
            let header_len = data.len().min(FORMAT_VERSION_HEADER.len());
            bail!(
                "This block has an unsupported format version. Header: {}",
                hex::encode(&data[..header_len])
            );
        } else {
            bail!("This is not a valid block file");
        }
    }
    data.shrink_to_subregion(FORMAT_VERSION_HEADER.len()..);
    Ok(data)
}

async fn _create_dir_if_doesnt_exist(dir: &Path) -> Result<()> {
    match tokio::fs::create_dir(dir).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn _is_allowed_blockid_character(c: char) -> bool {
    c.is_ascii_digit() || ('A'..='F').contains(&c)
}

async fn _store(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("Block file path {} has no parent", path.display()))?;
    _create_dir_if_doesnt_exist(parent).await.with_context(|| {
        format!(
            "Failed to create parent directory for block file at {}",
            path.display()
        )
    })?;
    let mut file_content = Vec::with_capacity(FORMAT_VERSION_HEADER.len() + data.len());
    file_content.extend_from_slice(FORMAT_VERSION_HEADER);
    file_content.extend_from_slice(data);
    tokio::fs::write(path, file_content)
        .await
        .with_context(|| format!("Failed to write to block file at {}", path.display()))
}

fn _block_path(basedir: &Path, block_id: &BlockId) -> PathBuf {
    let block_id_str = block_id.to_hex();
    basedir
        .join(&block_id_str[..PREFIX_LEN])
        .join(&block_id_str[PREFIX_LEN..])
}
