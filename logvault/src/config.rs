//! Store configuration
//!
//! Constants used by the blob stores and the database pool, plus the
//! `StoreConfig` object handed to `AppState::initialize`.

use crate::error::{AppError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ===== Blob Store =====

/// Prefix for staged upload files inside a managed directory
pub const TEMP_FILE_PREFIX: &str = "upload-";
/// Suffix for staged upload files inside a managed directory
pub const TEMP_FILE_SUFFIX: &str = ".tmp";

/// Read buffer used while streaming an upload into a temp file
pub const COPY_BUFFER_SIZE: usize = 8 * 1024;

/// Directory (under the data dir) holding attachment blobs
pub const ATTACHMENTS_DIR_NAME: &str = "attachments";
/// Directory (under the data dir) holding uploaded log blobs
pub const IMPORTS_DIR_NAME: &str = "imports";

/// Temp files older than this are assumed abandoned by a crashed upload (1 day)
pub const DEFAULT_STALE_TEMP_SECS: u64 = 24 * 60 * 60;

// ===== Database =====

pub const DEFAULT_DATABASE_FILE: &str = "logvault.db";

/// Connections in the application pool
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long SQLite waits on a locked database before failing
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to build the stores
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    #[serde(default = "default_database_file")]
    pub database_file: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_stale_temp_secs")]
    pub stale_temp_secs: u64,
}

fn default_database_file() -> String {
    DEFAULT_DATABASE_FILE.to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_stale_temp_secs() -> u64 {
    DEFAULT_STALE_TEMP_SECS
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database_file: default_database_file(),
            max_connections: default_max_connections(),
            stale_temp_secs: default_stale_temp_secs(),
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StoreConfig = serde_json::from_str(&content)?;
        config.validate()?;

        tracing::info!("Loaded store configuration from: {:?}", path);

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(AppError::Config("data_dir must not be empty".to_string()));
        }
        if self.database_file.trim().is_empty() {
            return Err(AppError::Config("database_file must not be empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(AppError::Config("max_connections must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.data_dir.join(ATTACHMENTS_DIR_NAME)
    }

    pub fn imports_dir(&self) -> PathBuf {
        self.data_dir.join(IMPORTS_DIR_NAME)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn stale_temp_age(&self) -> Duration {
        Duration::from_secs(self.stale_temp_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new("./logvault-data")
    }
}
