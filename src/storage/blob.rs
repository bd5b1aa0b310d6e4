//! On-disk file contents, one file per transfer id.

use std::io::SeekFrom;
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{RelayError, Result};

#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
}

impl BlobStore {
    /// Open the store, creating its directory if needed.
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;

        info!(path = %base_path.display(), "Blob store initialized");
        Ok(Self { base_path })
    }

    /// Create (or truncate) the blob for `id`.
    pub async fn create(&self, id: &str) -> Result<()> {
        let path = self.blob_path(id)?;
        File::create(&path).await?;

        debug!(id = %id, "Opened blob for upload");
        Ok(())
    }

    /// Append `data` to the blob for `id`.
    pub async fn append(&self, id: &str, data: &[u8]) -> Result<()> {
        let path = self.blob_path(id)?;
        let mut file = OpenOptions::new().append(true).open(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read up to `len` bytes starting at `offset`. Shorter if the blob ends
    /// first.
    pub async fn read_at(&self, id: &str, offset: u64, len: usize) -> Result<Bytes> {
        let path = self.blob_path(id)?;
        let mut file = File::open(&path).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut chunk = BytesMut::zeroed(len);
        let mut filled = 0;
        while filled < len {
            let n = file.read(&mut chunk[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        chunk.truncate(filled);
        Ok(chunk.freeze())
    }

    /// Blob ids are server-issued UUIDs; anything else never maps to a path.
    fn blob_path(&self, id: &str) -> Result<PathBuf> {
        let id = Uuid::parse_str(id)
            .map_err(|_| RelayError::TransferNotFound(id.to_string()))?;
        Ok(self.base_path.join(id.to_string()))
    }
}
