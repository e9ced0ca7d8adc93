//! Application state and initialization
//!
//! Builds the pool, the blob stores and both services from a `StoreConfig`.
//! Directory creation happens once here; failure is fatal to startup.

use crate::config::StoreConfig;
use crate::database::create_pool;
use crate::error::Result;
use crate::services::{AttachmentsService, ImportsService};
use crate::storage::BlobStore;
use sqlx::SqlitePool;

/// Central state holding all services
#[derive(Clone)]
pub struct AppState {
    pub config: StoreConfig,
    pub pool: SqlitePool,
    pub attachments: AttachmentsService,
    pub imports: ImportsService,
}

impl AppState {
    /// Initialize storage - called once on startup
    pub async fn initialize(config: StoreConfig) -> Result<Self> {
        tracing::info!("Initializing storage");
        config.validate()?;

        tracing::info!("Data directory: {:?}", config.data_dir);

        let attachment_blobs = BlobStore::new(config.attachments_dir());
        attachment_blobs.initialize().await?;

        let import_blobs = BlobStore::new(config.imports_dir());
        import_blobs.initialize().await?;

        let pool = create_pool(&config.database_path(), config.max_connections).await?;

        let state = Self {
            attachments: AttachmentsService::new(pool.clone(), attachment_blobs),
            imports: ImportsService::new(pool.clone(), import_blobs),
            pool,
            config,
        };

        tracing::info!("Storage initialized successfully");

        Ok(state)
    }

    /// Remove temp files abandoned by crashed uploads in both blob directories
    pub async fn sweep_stale_uploads(&self) -> Result<usize> {
        let age = self.config.stale_temp_age();
        let removed = self
            .attachments
            .blob_store()
            .remove_stale_temp_files(age)
            .await?
            + self.imports.blob_store().remove_stale_temp_files(age).await?;

        if removed > 0 {
            tracing::info!("Removed {} stale temp file(s)", removed);
        }
        Ok(removed)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
