//! Id-addressed blob storage
//!
//! Stores one payload per metadata record in a flat directory, using the
//! record's numeric id as the file name. Uploads are streamed into a uniquely
//! named temp file in the same directory (hashing as they go) and then
//! renamed onto the canonical path, so a reader never sees a partial blob.
//!
//! Example: record id 42 is stored at "attachments/42"

use crate::config::{COPY_BUFFER_SIZE, TEMP_FILE_PREFIX, TEMP_FILE_SUFFIX};
use crate::error::{AppError, Result};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempPath;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};

/// Buffered reader over a published blob
pub type BlobReader = BufReader<fs::File>;

/// An upload that has been fully written to a temp file but not yet published.
///
/// Dropping a `StagedBlob` without publishing it removes the temp file.
#[derive(Debug)]
pub struct StagedBlob {
    temp_path: TempPath,
    size: u64,
    digest: String,
}

impl StagedBlob {
    /// Number of bytes staged
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Lowercase hex SHA-256 of the staged bytes
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn path(&self) -> &Path {
        &self.temp_path
    }
}

/// Blob store over one managed directory
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create a new blob store at the given root directory
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Initialize the blob store (create directory and parents if needed)
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        tracing::info!("Blob store initialized at: {:?}", self.root);
        Ok(())
    }

    /// Stream `reader` to a new temp file, hashing while writing.
    ///
    /// The temp file is removed on any failure, including an empty upload.
    pub async fn write_temp<R>(&self, mut reader: R) -> Result<StagedBlob>
    where
        R: AsyncRead + Unpin,
    {
        let named = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .suffix(TEMP_FILE_SUFFIX)
            .tempfile_in(&self.root)?;
        let (std_file, temp_path) = named.into_parts();
        let mut file = fs::File::from_std(std_file);

        tracing::debug!("Staging upload into {:?}", temp_path);

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut size: u64 = 0;

        loop {
            let n = reader.read(&mut buf).await.map_err(|e| {
                tracing::error!("Failed reading upload after {} bytes: {}", size, e);
                e
            })?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await.map_err(|e| {
                tracing::error!("Failed writing upload to {:?}: {}", temp_path, e);
                e
            })?;
            size += n as u64;
        }

        if size == 0 {
            tracing::debug!("Empty upload, discarding {:?}", temp_path);
            return Err(AppError::EmptyUpload);
        }

        file.flush().await?;
        file.sync_all().await?;

        let digest = format!("{:x}", hasher.finalize());
        tracing::debug!("Staged {} bytes into {:?} (sha256 {})", size, temp_path, digest);

        Ok(StagedBlob {
            temp_path,
            size,
            digest,
        })
    }

    /// Atomically move a staged blob onto the canonical path for `id`,
    /// replacing any blob already stored there.
    ///
    /// Errors only when the rename fails. Once the rename succeeds the blob is
    /// visible, so a failed directory fsync is logged and not returned.
    pub async fn publish(&self, staged: StagedBlob, id: i64) -> Result<()> {
        let path = self.blob_path(id);

        if path.exists() {
            tracing::info!("Replacing blob data for id {}", id);
        }

        staged.temp_path.persist(&path).map_err(|e| {
            tracing::error!("Failed to publish blob {} to {:?}: {}", id, path, e.error);
            AppError::Io(e.error)
        })?;

        self.sync_after_publish(id).await;

        tracing::debug!("Published blob: {} ({} bytes)", id, staged.size);

        Ok(())
    }

    /// Make a completed rename durable. Returns false when the fsync failed.
    async fn sync_after_publish(&self, id: i64) -> bool {
        match self.sync_root().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "Blob {} is published but syncing {:?} failed: {}",
                    id,
                    self.root,
                    e
                );
                false
            }
        }
    }

    /// Open a published blob for reading
    pub async fn open_for_read(&self, id: i64) -> Result<BlobReader> {
        match fs::File::open(self.blob_path(id)).await {
            Ok(file) => Ok(BufReader::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::BlobNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if a blob exists
    pub async fn exists(&self, id: i64) -> Result<bool> {
        Ok(fs::try_exists(self.blob_path(id)).await?)
    }

    /// Delete a blob. Returns whether a file was actually removed.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        match fs::remove_file(self.blob_path(id)).await {
            Ok(()) => {
                tracing::debug!("Deleted blob: {}", id);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Ids of every published blob (for integrity audits)
    pub async fn list_ids(&self) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(parse_blob_name) {
                ids.push(id);
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    /// Temp files currently present in the managed directory
    pub async fn list_temp_files(&self) -> Result<Vec<PathBuf>> {
        let mut temps = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_str().is_some_and(is_temp_name) {
                temps.push(entry.path());
            }
        }

        Ok(temps)
    }

    /// Remove temp files last modified at least `older_than` ago.
    ///
    /// These are left behind only when the process dies mid-upload.
    pub async fn remove_stale_temp_files(&self, older_than: Duration) -> Result<usize> {
        let mut removed = 0;

        for path in self.list_temp_files().await? {
            let modified = match fs::metadata(&path).await {
                Ok(meta) => meta.modified()?,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            // A timestamp in the future counts as age zero.
            let stale = modified
                .elapsed()
                .map(|age| age >= older_than)
                .unwrap_or(older_than.is_zero());
            if !stale {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::info!("Removed stale temp file: {:?}", path);
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(removed)
    }

    /// Canonical file path for an id
    pub fn blob_path(&self, id: i64) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Get blob store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[cfg(unix)]
    async fn sync_root(&self) -> Result<()> {
        fs::File::open(&self.root).await?.sync_all().await?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn sync_root(&self) -> Result<()> {
        Ok(())
    }
}

/// Canonical names are the plain decimal id, nothing else
fn parse_blob_name(name: &str) -> Option<i64> {
    let id: i64 = name.parse().ok()?;
    (id.to_string() == name).then_some(id)
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_FILE_PREFIX) && name.ends_with(TEMP_FILE_SUFFIX)
}
