//! Database module
//!
//! Metadata storage for attachments and imports:
//! - Schema and migrations
//! - Model definitions
//! - Record functions run against a caller-scoped connection
//!
//! The `SqlitePool` returned by [`create_pool`] is the connection provider
//! the services draw from, one connection per operation.

pub mod models;
pub mod repository;
pub mod schema;

pub use models::*;
pub use repository::{AttachmentRecords, ImportRecords};
pub use schema::initialize_database;

use crate::config::BUSY_TIMEOUT;
use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, Connection, SqlitePool};
use std::path::Path;

fn connect_options(db_path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .busy_timeout(BUSY_TIMEOUT)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
}

/// Open the database at `db_path`, migrate it, and return the application pool.
///
/// Migrations run on a standalone connection that is closed before any pooled
/// connection opens, so no pooled connection can cache a pre-migration schema.
pub async fn create_pool(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    tracing::info!("Creating database connection pool at: {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = connect_options(db_path);

    let mut conn = options.connect().await?;
    initialize_database(&mut conn).await?;
    conn.close().await?;

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    tracing::info!(
        "Database pool created with up to {} connection(s)",
        max_connections
    );

    Ok(pool)
}
