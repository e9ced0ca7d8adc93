//! Attachments service
//!
//! Keeps attachment rows and attachment blobs in agreement. No transaction
//! spans both stores, so every operation follows a fixed order:
//!
//! - put: stage the upload, upsert the row (assigns the id), publish the blob
//! - delete: remove the blob first, then the row
//!
//! The only windows where the two stores can disagree are between the upsert
//! and the publish, and between the blob delete and the row delete. A row
//! left behind by the second is re-deletable; a blob without a row is only
//! ever produced by an external fault and is reported by [`AttachmentsService::audit`].

use crate::database::{Attachment, AttachmentPatch, AttachmentRecords, NewAttachment};
use crate::error::{AppError, Result};
use crate::services::integrity::{self, DriftReport};
use crate::storage::{BlobReader, BlobStore};
use sqlx::{SqliteConnection, SqlitePool};
use tokio::io::AsyncRead;

/// Service for managing attachments
#[derive(Clone)]
pub struct AttachmentsService {
    pool: SqlitePool,
    blob_store: BlobStore,
}

impl AttachmentsService {
    pub fn new(pool: SqlitePool, blob_store: BlobStore) -> Self {
        Self { pool, blob_store }
    }

    /// Add an attachment, or replace the one already at `(owner, path)`.
    ///
    /// A replaced attachment keeps its id; its metadata and bytes are fully
    /// overwritten by this upload.
    pub async fn put<R>(&self, req: NewAttachment, data: Option<R>) -> Result<Attachment>
    where
        R: AsyncRead + Unpin,
    {
        let data = data.ok_or(AppError::NoData)?;
        validate_key(&req.owner, &req.path)?;

        tracing::info!(
            "Receiving attachment for owner={} path={}",
            req.owner,
            req.path
        );

        let staged = self.blob_store.write_temp(data).await?;
        tracing::info!("Stored {} bytes into {:?}", staged.size(), staged.path());

        // A failed upsert drops `staged`, which removes the temp file.
        let attachment = {
            let mut conn = self.pool.acquire().await?;
            AttachmentRecords::upsert(&mut conn, &req).await?
        };

        self.blob_store
            .publish(staged, attachment.id)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Attachment {} (owner={} path={}) has a row but its data failed to publish: {}",
                    attachment.id,
                    attachment.owner,
                    attachment.path,
                    e
                );
                e
            })?;

        tracing::info!(
            "Finished uploading attachment {} {}",
            attachment.id,
            attachment.path
        );

        Ok(attachment)
    }

    /// Get an attachment, or `None` if no such owner/path exists
    pub async fn get(&self, owner: &str, path: &str) -> Result<Option<Attachment>> {
        let mut conn = self.pool.acquire().await?;
        AttachmentRecords::find(&mut conn, owner, path).await
    }

    /// Open the stored bytes of an attachment
    pub async fn get_data(&self, owner: &str, path: &str) -> Result<BlobReader> {
        let attachment = self
            .get(owner, path)
            .await?
            .ok_or_else(|| not_found(owner, path))?;

        match self.blob_store.open_for_read(attachment.id).await {
            Err(AppError::BlobNotFound(id)) => {
                tracing::warn!(
                    "Attachment data does not exist even though a record still exists for {} (owner={} path={})",
                    id,
                    owner,
                    path
                );
                Err(AppError::BlobNotFound(id))
            }
            other => other,
        }
    }

    /// List attachments for an owner (empty if none)
    pub async fn list_for_owner(&self, owner: &str) -> Result<Vec<Attachment>> {
        let mut conn = self.pool.acquire().await?;
        AttachmentRecords::list_for_owner(&mut conn, owner).await
    }

    /// Update attachment metadata. The stored bytes are never touched.
    pub async fn update(&self, owner: &str, path: &str, patch: AttachmentPatch) -> Result<Attachment> {
        if let Some(new_path) = &patch.path {
            validate_key(owner, new_path)?;
        }

        tracing::debug!("Updating attachment owner={} path={}", owner, path);

        let mut conn = self.pool.acquire().await?;
        AttachmentRecords::update(&mut conn, owner, path, &patch)
            .await?
            .ok_or_else(|| not_found(owner, path))
    }

    /// Delete an attachment and its data
    pub async fn delete(&self, owner: &str, path: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        self.delete_with(&mut conn, owner, path).await
    }

    /// Delete every attachment for an owner, one at a time.
    ///
    /// Not atomic: a failure part way through leaves earlier deletions done.
    /// Returns how many attachments were deleted.
    pub async fn delete_for_owner(&self, owner: &str) -> Result<usize> {
        let mut conn = self.pool.acquire().await?;
        let attachments = AttachmentRecords::list_for_owner(&mut conn, owner).await?;

        tracing::info!(
            "Deleting {} attachment(s) for owner={}",
            attachments.len(),
            owner
        );

        let mut deleted = 0;
        for attachment in attachments {
            match self.delete_with(&mut conn, &attachment.owner, &attachment.path).await {
                Ok(()) => deleted += 1,
                // Removed by someone else since the listing.
                Err(AppError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(deleted)
    }

    /// Report rows without blobs and blobs without rows
    pub async fn audit(&self) -> Result<DriftReport> {
        let mut conn = self.pool.acquire().await?;

        let ids = AttachmentRecords::list_ids(&mut conn).await?;
        let mut report = integrity::find_drift(&ids, &self.blob_store).await?;
        if !report.orphan_blobs.is_empty() {
            let ids = AttachmentRecords::list_ids(&mut conn).await?;
            integrity::confirm_orphans(&mut report, &ids, &self.blob_store).await?;
        }

        integrity::log_report("attachment", &report);
        Ok(report)
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.blob_store
    }

    async fn delete_with(&self, conn: &mut SqliteConnection, owner: &str, path: &str) -> Result<()> {
        let attachment = AttachmentRecords::find(conn, owner, path)
            .await?
            .ok_or_else(|| not_found(owner, path))?;

        tracing::info!("Deleting attachment: {} (owner={} path={})", attachment.id, owner, path);

        // Data first, then the record.
        let removed = self.blob_store.delete(attachment.id).await.map_err(|e| {
            tracing::error!(
                "Cannot delete attachment {} because its data could not be deleted: {}",
                attachment.id,
                e
            );
            e
        })?;
        if !removed {
            tracing::warn!(
                "Attachment data does not exist even though a record still exists for {}. Will delete record anyway.",
                attachment.id
            );
        }

        let rows = AttachmentRecords::delete(conn, owner, path).await?;
        if rows == 0 {
            tracing::info!("No records erased for attachment owner={} path={}", owner, path);
        }

        Ok(())
    }
}

fn validate_key(owner: &str, path: &str) -> Result<()> {
    if owner.trim().is_empty() {
        return Err(AppError::Validation("Attachment owner must not be empty".to_string()));
    }
    if path.trim().is_empty() {
        return Err(AppError::Validation("Attachment path must not be empty".to_string()));
    }
    Ok(())
}

fn not_found(owner: &str, path: &str) -> AppError {
    AppError::NotFound(format!("attachment owner={} path={}", owner, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::create_pool;
    use crate::error::ErrorKind;
    use crate::storage::testing::BrokenReader;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn create_test_service() -> (AttachmentsService, TempDir) {
        let temp_dir = TempDir::new().unwrap();

        // One connection: any operation holding two at once would hang here.
        let pool = create_pool(&temp_dir.path().join("test.db"), 1).await.unwrap();

        let blob_store = BlobStore::new(temp_dir.path().join("attachments"));
        blob_store.initialize().await.unwrap();

        (AttachmentsService::new(pool, blob_store), temp_dir)
    }

    async fn create_shared_service(connections: u32) -> (AttachmentsService, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = create_pool(&temp_dir.path().join("test.db"), connections)
            .await
            .unwrap();

        let blob_store = BlobStore::new(temp_dir.path().join("attachments"));
        blob_store.initialize().await.unwrap();

        (AttachmentsService::new(pool, blob_store), temp_dir)
    }

    async fn read_data(service: &AttachmentsService, owner: &str, path: &str) -> Vec<u8> {
        let mut reader = service.get_data(owner, path).await.unwrap();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        data
    }

    async fn temp_file_count(service: &AttachmentsService) -> usize {
        service.blob_store().list_temp_files().await.unwrap().len()
    }

    #[tokio::test]
    async fn test_put_and_get_data() {
        let (service, _temp) = create_test_service().await;

        let data = b"Hello, World!";
        let attachment = service
            .put(
                NewAttachment::new("review-1", "hello.txt").with_mime_type("text/plain"),
                Some(&data[..]),
            )
            .await
            .unwrap();

        assert_eq!(attachment.owner, "review-1");
        assert_eq!(attachment.path, "hello.txt");
        assert_eq!(
            service.get("review-1", "hello.txt").await.unwrap(),
            Some(attachment.clone())
        );
        assert_eq!(read_data(&service, "review-1", "hello.txt").await, data);

        // The blob is named by the id alone.
        assert!(service.blob_store().blob_path(attachment.id).exists());
        assert!(service
            .blob_store()
            .root()
            .join(attachment.id.to_string())
            .exists());
    }

    #[tokio::test]
    async fn test_put_without_stream() {
        let (service, _temp) = create_test_service().await;

        let result = service
            .put(NewAttachment::new("review-1", "a.txt"), None::<&[u8]>)
            .await;

        assert!(matches!(result, Err(AppError::NoData)));
        assert!(service.list_for_owner("review-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_empty_stream_creates_nothing() {
        let (service, _temp) = create_test_service().await;

        let result = service
            .put(NewAttachment::new("review-1", "empty.txt"), Some(&b""[..]))
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, AppError::EmptyUpload));
        assert_eq!(err.kind(), ErrorKind::User);
        assert!(service.get("review-1", "empty.txt").await.unwrap().is_none());
        assert_eq!(temp_file_count(&service).await, 0);
        assert!(service.blob_store().list_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_failing_stream_creates_nothing() {
        let (service, _temp) = create_test_service().await;

        let stream = (&b"0123456789"[..]).chain(BrokenReader);
        let err = service
            .put(NewAttachment::new("review-1", "broken.bin"), Some(stream))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(service.get("review-1", "broken.bin").await.unwrap().is_none());
        assert_eq!(temp_file_count(&service).await, 0);
    }

    #[tokio::test]
    async fn test_put_insert_failure_discards_upload() {
        let (service, _temp) = create_test_service().await;

        sqlx::query("DROP TABLE attachments")
            .execute(&service.pool)
            .await
            .unwrap();

        let err = service
            .put(NewAttachment::new("review-1", "a.txt"), Some(&b"payload"[..]))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Database(_)));
        assert_eq!(temp_file_count(&service).await, 0);
        assert!(service.blob_store().list_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_rejects_empty_key() {
        let (service, _temp) = create_test_service().await;

        let result = service
            .put(NewAttachment::new("review-1", "  "), Some(&b"data"[..]))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(temp_file_count(&service).await, 0);
    }

    #[tokio::test]
    async fn test_replace_keeps_id_and_newest_bytes() {
        let (service, _temp) = create_test_service().await;

        let first = service
            .put(
                NewAttachment::new("review-1", "report.csv").with_description("draft"),
                Some(&b"a much longer first version of the file"[..]),
            )
            .await
            .unwrap();
        let second = service
            .put(NewAttachment::new("review-1", "report.csv"), Some(&b"v2"[..]))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.description, None);
        assert_eq!(read_data(&service, "review-1", "report.csv").await, b"v2");
        assert_eq!(service.list_for_owner("review-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_leaves_data_alone() {
        let (service, _temp) = create_test_service().await;

        let created = service
            .put(NewAttachment::new("review-1", "a.png"), Some(&b"\x89PNG...."[..]))
            .await
            .unwrap();

        let updated = service
            .update(
                "review-1",
                "a.png",
                AttachmentPatch {
                    description: Some(Some("Throughput graph".to_string())),
                    mime_type: Some(Some("image/png".to_string())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.description.as_deref(), Some("Throughput graph"));
        assert_eq!(updated.uploaded_at_millis, created.uploaded_at_millis);
        assert_eq!(read_data(&service, "review-1", "a.png").await, b"\x89PNG....");
    }

    #[tokio::test]
    async fn test_update_rename() {
        let (service, _temp) = create_test_service().await;

        let created = service
            .put(NewAttachment::new("review-1", "old.txt"), Some(&b"contents"[..]))
            .await
            .unwrap();
        service
            .put(NewAttachment::new("review-1", "taken.txt"), Some(&b"other"[..]))
            .await
            .unwrap();

        let conflict = service
            .update(
                "review-1",
                "old.txt",
                AttachmentPatch {
                    path: Some("taken.txt".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(conflict, Err(AppError::Conflict(_))));

        let renamed = service
            .update(
                "review-1",
                "old.txt",
                AttachmentPatch {
                    path: Some("new.txt".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.id, created.id);
        assert!(service.get("review-1", "old.txt").await.unwrap().is_none());
        assert_eq!(read_data(&service, "review-1", "new.txt").await, b"contents");
    }

    #[tokio::test]
    async fn test_update_missing() {
        let (service, _temp) = create_test_service().await;

        let result = service
            .update("review-1", "nope.txt", AttachmentPatch::default())
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_missing_touches_nothing() {
        let (service, _temp) = create_test_service().await;

        let kept = service
            .put(NewAttachment::new("review-1", "keep.txt"), Some(&b"keep"[..]))
            .await
            .unwrap();

        let result = service.delete("review-1", "other.txt").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(service.blob_store().list_ids().await.unwrap(), vec![kept.id]);
        assert_eq!(read_data(&service, "review-1", "keep.txt").await, b"keep");
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let (service, _temp) = create_test_service().await;

        let attachment = service
            .put(NewAttachment::new("review-1", "a.txt"), Some(&b"data"[..]))
            .await
            .unwrap();

        service.delete("review-1", "a.txt").await.unwrap();
        assert!(service.get("review-1", "a.txt").await.unwrap().is_none());
        assert!(!service.blob_store().exists(attachment.id).await.unwrap());

        let second = service.delete("review-1", "a.txt").await;
        assert!(matches!(second, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_blob() {
        let (service, _temp) = create_test_service().await;

        let attachment = service
            .put(NewAttachment::new("review-1", "a.txt"), Some(&b"data"[..]))
            .await
            .unwrap();
        std::fs::remove_file(service.blob_store().blob_path(attachment.id)).unwrap();

        let read = service.get_data("review-1", "a.txt").await;
        assert!(matches!(read, Err(AppError::BlobNotFound(_))));

        service.delete("review-1", "a.txt").await.unwrap();
        assert!(service.get("review-1", "a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_data_unknown() {
        let (service, _temp) = create_test_service().await;

        let result = service.get_data("review-1", "nope").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_for_owner() {
        let (service, _temp) = create_test_service().await;

        for path in ["a.txt", "b.txt", "c.txt"] {
            service
                .put(NewAttachment::new("review-1", path), Some(&b"x"[..]))
                .await
                .unwrap();
        }
        let other = service
            .put(NewAttachment::new("review-2", "a.txt"), Some(&b"y"[..]))
            .await
            .unwrap();

        let deleted = service.delete_for_owner("review-1").await.unwrap();
        assert_eq!(deleted, 3);
        assert!(service.list_for_owner("review-1").await.unwrap().is_empty());
        assert_eq!(service.blob_store().list_ids().await.unwrap(), vec![other.id]);

        assert_eq!(service.delete_for_owner("review-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_audit() {
        let (service, _temp) = create_test_service().await;

        let a = service
            .put(NewAttachment::new("review-1", "a.txt"), Some(&b"x"[..]))
            .await
            .unwrap();
        assert!(service.audit().await.unwrap().is_clean());

        std::fs::remove_file(service.blob_store().blob_path(a.id)).unwrap();
        std::fs::write(service.blob_store().blob_path(999), b"leak").unwrap();

        let report = service.audit().await.unwrap();
        assert_eq!(report.missing_blobs, vec![a.id]);
        assert_eq!(report.orphan_blobs, vec![999]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_converge_on_one_row() {
        let (service, _temp) = create_shared_service(5).await;

        let payloads: Vec<Vec<u8>> = (0..16)
            .map(|i| format!("upload {:02};", i).repeat(256).into_bytes())
            .collect();

        let mut handles = Vec::new();
        for payload in payloads.clone() {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .put(NewAttachment::new("review-1", "shared.log"), Some(payload.as_slice()))
                    .await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1);

        let listed = service.list_for_owner("review-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, ids[0]);

        let stored = read_data(&service, "review-1", "shared.log").await;
        assert!(payloads.contains(&stored));
        assert_eq!(temp_file_count(&service).await, 0);
    }

    #[tokio::test]
    async fn test_open_reader_survives_replace() {
        let (service, _temp) = create_test_service().await;

        service
            .put(NewAttachment::new("review-1", "a.log"), Some(&b"old-bytes"[..]))
            .await
            .unwrap();
        let mut before = service.get_data("review-1", "a.log").await.unwrap();

        service
            .put(NewAttachment::new("review-1", "a.log"), Some(&b"new bytes, longer"[..]))
            .await
            .unwrap();

        let mut data = Vec::new();
        before.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"old-bytes");
        assert_eq!(read_data(&service, "review-1", "a.log").await, b"new bytes, longer");
    }
}
