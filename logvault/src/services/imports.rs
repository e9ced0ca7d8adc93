//! Imports service
//!
//! Uploaded log files awaiting processing. Same lifecycle as attachments,
//! keyed only by id, with the upload's SHA-256 digest and size recorded on
//! the row.

use crate::database::{ImportInfo, ImportPatch, ImportRecords, NewImport};
use crate::error::{AppError, Result};
use crate::services::integrity::{self, DriftReport};
use crate::storage::{BlobReader, BlobStore};
use sqlx::SqlitePool;
use tokio::io::AsyncRead;

/// Byte count as the signed column stores it
fn stored_size(size: u64) -> Result<i64> {
    i64::try_from(size)
        .map_err(|_| AppError::Internal(format!("Upload size {} exceeds the size column", size)))
}

/// Service for managing uploaded log imports
#[derive(Clone)]
pub struct ImportsService {
    pool: SqlitePool,
    blob_store: BlobStore,
}

impl ImportsService {
    pub fn new(pool: SqlitePool, blob_store: BlobStore) -> Self {
        Self { pool, blob_store }
    }

    /// Store an uploaded file and create its import record
    pub async fn upload<R>(&self, req: NewImport, data: Option<R>) -> Result<ImportInfo>
    where
        R: AsyncRead + Unpin,
    {
        let data = data.ok_or(AppError::NoData)?;

        tracing::info!("Storing uploaded file {:?}", req.original_filename);

        let staged = self.blob_store.write_temp(data).await?;
        let size = stored_size(staged.size())?;

        let info = {
            let mut conn = self.pool.acquire().await?;
            ImportRecords::insert(&mut conn, &req, staged.digest(), size).await?
        };

        self.blob_store.publish(staged, info.id).await.map_err(|e| {
            tracing::error!(
                "Import {} has a row but its data failed to publish: {}",
                info.id,
                e
            );
            e
        })?;

        tracing::info!(
            "Finished uploading import {} ({} bytes, sha256 {})",
            info.id,
            info.size_bytes,
            info.content_digest
        );

        Ok(info)
    }

    /// Get an import, or `None` if it does not exist
    pub async fn get(&self, id: i64) -> Result<Option<ImportInfo>> {
        let mut conn = self.pool.acquire().await?;
        ImportRecords::find(&mut conn, id).await
    }

    /// Open the uploaded bytes of an import
    pub async fn get_data(&self, id: i64) -> Result<BlobReader> {
        let info = self.get(id).await?.ok_or_else(|| not_found(id))?;

        match self.blob_store.open_for_read(info.id).await {
            Err(AppError::BlobNotFound(id)) => {
                tracing::warn!("Import data does not exist even though a record still exists for {}", id);
                Err(AppError::BlobNotFound(id))
            }
            other => other,
        }
    }

    pub async fn list(&self) -> Result<Vec<ImportInfo>> {
        let mut conn = self.pool.acquire().await?;
        ImportRecords::list(&mut conn).await
    }

    /// Update import metadata. The stored bytes are never touched.
    pub async fn update(&self, id: i64, patch: ImportPatch) -> Result<ImportInfo> {
        tracing::debug!("Updating import: {}", id);

        let mut conn = self.pool.acquire().await?;
        ImportRecords::update(&mut conn, id, &patch)
            .await?
            .ok_or_else(|| not_found(id))
    }

    /// Delete an import and its data
    pub async fn delete(&self, id: i64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        if ImportRecords::find(&mut conn, id).await?.is_none() {
            return Err(not_found(id));
        }

        tracing::info!("Deleting import: {}", id);

        if !self.blob_store.delete(id).await? {
            tracing::warn!(
                "Import data does not exist even though a record still exists for {}. Will delete record anyway.",
                id
            );
        }

        if ImportRecords::delete(&mut conn, id).await? == 0 {
            tracing::info!("No records erased for import {}", id);
        }

        Ok(())
    }

    /// Report rows without blobs and blobs without rows
    pub async fn audit(&self) -> Result<DriftReport> {
        let mut conn = self.pool.acquire().await?;

        let ids = ImportRecords::list_ids(&mut conn).await?;
        let mut report = integrity::find_drift(&ids, &self.blob_store).await?;
        if !report.orphan_blobs.is_empty() {
            let ids = ImportRecords::list_ids(&mut conn).await?;
            integrity::confirm_orphans(&mut report, &ids, &self.blob_store).await?;
        }

        integrity::log_report("import", &report);
        Ok(report)
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.blob_store
    }
}

fn not_found(id: i64) -> AppError {
    AppError::NotFound(format!("import_id={}", id))
}
