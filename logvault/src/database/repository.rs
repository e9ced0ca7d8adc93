//! Record functions for metadata rows
//!
//! Every function runs against a connection supplied by the caller, so a
//! service can hold exactly one connection for the whole of one operation.
//! Duplicate `(owner, path)` writes are rejected by the table's unique
//! constraint and surface as `AppError::Conflict`.

use super::models::*;
use crate::error::{AppError, Result};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Attachment rows, unique by `(owner, path)`
pub struct AttachmentRecords;

impl AttachmentRecords {
    /// Insert a row, or replace the non-key fields of the row already
    /// holding `(owner, path)`. The existing id is kept on replace.
    pub async fn upsert(conn: &mut SqliteConnection, req: &NewAttachment) -> Result<Attachment> {
        let uploaded_at = req.uploaded_at_millis.unwrap_or_else(now_millis);

        let attachment = sqlx::query_as::<_, Attachment>(
            r#"
            INSERT INTO attachments (owner, path, description, mime_type, uploaded_at_millis)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (owner, path) DO UPDATE SET
                description = excluded.description,
                mime_type = excluded.mime_type,
                uploaded_at_millis = excluded.uploaded_at_millis
            RETURNING *
            "#,
        )
        .bind(&req.owner)
        .bind(&req.path)
        .bind(&req.description)
        .bind(&req.mime_type)
        .bind(uploaded_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            AppError::from_db(e, format!("attachment owner={} path={}", req.owner, req.path))
        })?;

        tracing::debug!(
            "Upserted attachment: {} (owner={} path={})",
            attachment.id,
            attachment.owner,
            attachment.path
        );
        Ok(attachment)
    }

    /// Get an attachment by owner and path
    pub async fn find(
        conn: &mut SqliteConnection,
        owner: &str,
        path: &str,
    ) -> Result<Option<Attachment>> {
        let attachment = sqlx::query_as::<_, Attachment>(
            "SELECT * FROM attachments WHERE owner = ? AND path = ?",
        )
        .bind(owner)
        .bind(path)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(attachment)
    }

    /// List attachments for an owner
    pub async fn list_for_owner(conn: &mut SqliteConnection, owner: &str) -> Result<Vec<Attachment>> {
        let attachments = sqlx::query_as::<_, Attachment>(
            "SELECT * FROM attachments WHERE owner = ? ORDER BY path ASC",
        )
        .bind(owner)
        .fetch_all(&mut *conn)
        .await?;

        Ok(attachments)
    }

    pub async fn list_ids(conn: &mut SqliteConnection) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM attachments ORDER BY id ASC")
            .fetch_all(&mut *conn)
            .await?;
        Ok(ids)
    }

    /// Apply a partial update to the row at `(owner, path)`.
    ///
    /// Returns `None` when no such row exists. Never touches `id`.
    pub async fn update(
        conn: &mut SqliteConnection,
        owner: &str,
        path: &str,
        patch: &AttachmentPatch,
    ) -> Result<Option<Attachment>> {
        if patch.is_empty() {
            return Self::find(conn, owner, path).await;
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE attachments SET ");
        {
            let mut set = query.separated(", ");
            if let Some(new_path) = &patch.path {
                set.push("path = ").push_bind_unseparated(new_path.clone());
            }
            if let Some(description) = &patch.description {
                set.push("description = ")
                    .push_bind_unseparated(description.clone());
            }
            if let Some(mime_type) = &patch.mime_type {
                set.push("mime_type = ").push_bind_unseparated(mime_type.clone());
            }
            if let Some(uploaded_at) = patch.uploaded_at_millis {
                set.push("uploaded_at_millis = ")
                    .push_bind_unseparated(uploaded_at);
            }
        }
        query
            .push(" WHERE owner = ")
            .push_bind(owner.to_string())
            .push(" AND path = ")
            .push_bind(path.to_string())
            .push(" RETURNING *");

        let updated = query
            .build_query_as::<Attachment>()
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| {
                AppError::from_db(
                    e,
                    format!(
                        "attachment owner={} path={} already exists",
                        owner,
                        patch.path.as_deref().unwrap_or(path)
                    ),
                )
            })?;

        if let Some(attachment) = &updated {
            tracing::debug!("Updated attachment: {}", attachment.id);
        }
        Ok(updated)
    }

    /// Delete the row at `(owner, path)`. Returns rows affected (0 or 1).
    pub async fn delete(conn: &mut SqliteConnection, owner: &str, path: &str) -> Result<u64> {
        let rows = sqlx::query("DELETE FROM attachments WHERE owner = ? AND path = ?")
            .bind(owner)
            .bind(path)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        tracing::debug!("Deleted {} attachment row(s) for owner={} path={}", rows, owner, path);
        Ok(rows)
    }
}

/// Import rows, identified only by id
pub struct ImportRecords;

impl ImportRecords {
    /// Insert an import row carrying the digest and size captured at staging
    pub async fn insert(
        conn: &mut SqliteConnection,
        req: &NewImport,
        content_digest: &str,
        size_bytes: i64,
    ) -> Result<ImportInfo> {
        let uploaded_at = req.uploaded_at_millis.unwrap_or_else(now_millis);

        let info = sqlx::query_as::<_, ImportInfo>(
            r#"
            INSERT INTO imports (title, description, original_filename, user_specified_type,
                                 content_digest, size_bytes, uploaded_at_millis)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&req.title)
        .bind(&req.description)
        .bind(&req.original_filename)
        .bind(&req.user_specified_type)
        .bind(content_digest)
        .bind(size_bytes)
        .bind(uploaded_at)
        .fetch_one(&mut *conn)
        .await?;

        tracing::debug!("Created import: {} ({} bytes)", info.id, info.size_bytes);
        Ok(info)
    }

    pub async fn find(conn: &mut SqliteConnection, id: i64) -> Result<Option<ImportInfo>> {
        let info = sqlx::query_as::<_, ImportInfo>("SELECT * FROM imports WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(info)
    }

    pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<ImportInfo>> {
        let imports = sqlx::query_as::<_, ImportInfo>("SELECT * FROM imports ORDER BY id ASC")
            .fetch_all(&mut *conn)
            .await?;

        Ok(imports)
    }

    pub async fn list_ids(conn: &mut SqliteConnection) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM imports ORDER BY id ASC")
            .fetch_all(&mut *conn)
            .await?;
        Ok(ids)
    }

    /// Apply a partial update. Digest and size are fixed at upload time.
    pub async fn update(
        conn: &mut SqliteConnection,
        id: i64,
        patch: &ImportPatch,
    ) -> Result<Option<ImportInfo>> {
        if patch.is_empty() {
            return Self::find(conn, id).await;
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE imports SET ");
        {
            let mut set = query.separated(", ");
            if let Some(title) = &patch.title {
                set.push("title = ").push_bind_unseparated(title.clone());
            }
            if let Some(description) = &patch.description {
                set.push("description = ")
                    .push_bind_unseparated(description.clone());
            }
            if let Some(filename) = &patch.original_filename {
                set.push("original_filename = ")
                    .push_bind_unseparated(filename.clone());
            }
            if let Some(kind) = &patch.user_specified_type {
                set.push("user_specified_type = ")
                    .push_bind_unseparated(kind.clone());
            }
            if let Some(uploaded_at) = patch.uploaded_at_millis {
                set.push("uploaded_at_millis = ")
                    .push_bind_unseparated(uploaded_at);
            }
        }
        query.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

        let updated = query
            .build_query_as::<ImportInfo>()
            .fetch_optional(&mut *conn)
            .await?;

        if updated.is_some() {
            tracing::debug!("Updated import: {}", id);
        }
        Ok(updated)
    }

    pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<u64> {
        let rows = sqlx::query("DELETE FROM imports WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        tracing::debug!("Deleted {} import row(s) for id={}", rows, id);
        Ok(rows)
    }
}
