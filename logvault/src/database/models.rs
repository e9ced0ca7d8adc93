//! Database models
//!
//! Rust structs representing metadata rows and the requests that build or
//! patch them. All models use serde so a REST layer can pass them through.

use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

/// Keeps a present JSON `null` distinct from an absent key: absent stays
/// `None` through `#[serde(default)]`, `null` becomes `Some(None)`.
fn nullable<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// An attachment owned by a review (or any other owner key)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Attachment {
    /// Generated identity, also the blob's file name
    pub id: i64,
    pub owner: String,
    /// Unique within `owner`
    pub path: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub uploaded_at_millis: i64,
}

/// Create or replace attachment request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAttachment {
    pub owner: String,
    pub path: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    /// Upload time; defaults to now when absent
    pub uploaded_at_millis: Option<i64>,
}

impl NewAttachment {
    pub fn new(owner: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Update attachment request. `None` leaves a field unchanged; for the
/// nullable columns `Some(None)` clears the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttachmentPatch {
    /// Rename within the same owner
    pub path: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub mime_type: Option<Option<String>>,
    pub uploaded_at_millis: Option<i64>,
}

impl AttachmentPatch {
    pub fn is_empty(&self) -> bool {
        self.path.is_none()
            && self.description.is_none()
            && self.mime_type.is_none()
            && self.uploaded_at_millis.is_none()
    }
}

/// An uploaded log file awaiting or after import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ImportInfo {
    pub id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
    /// File name as the uploader had it
    pub original_filename: Option<String>,
    /// Content type declared by the uploader, not sniffed
    pub user_specified_type: Option<String>,
    /// SHA-256 hex of the payload, captured while staging
    pub content_digest: String,
    pub size_bytes: i64,
    pub uploaded_at_millis: i64,
}

/// Upload request for an import
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewImport {
    pub title: Option<String>,
    pub description: Option<String>,
    pub original_filename: Option<String>,
    pub user_specified_type: Option<String>,
    pub uploaded_at_millis: Option<i64>,
}

/// Update import request. Same convention as [`AttachmentPatch`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportPatch {
    #[serde(default, deserialize_with = "nullable")]
    pub title: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub original_filename: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub user_specified_type: Option<Option<String>>,
    pub uploaded_at_millis: Option<i64>,
}

impl ImportPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.original_filename.is_none()
            && self.user_specified_type.is_none()
            && self.uploaded_at_millis.is_none()
    }
}
