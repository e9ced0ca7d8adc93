//! Database schema and migrations
//!
//! Migrations are applied in order on one connection, each inside its own
//! transaction, and recorded in the `migrations` table.

use crate::error::Result;
use sqlx::{Connection, SqliteConnection};

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: include_str!("migrations/001_initial_schema.sql"),
}];

/// Bring the schema on `conn` up to the latest version
pub async fn initialize_database(conn: &mut SqliteConnection) -> Result<()> {
    tracing::info!("Initializing database schema");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    let current = schema_version(conn).await?;
    tracing::info!("Current database version: {}", current);

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tracing::info!("Applying migration {} ({})", migration.version, migration.name);

        let mut tx = conn.begin().await?;
        for statement in migration.sql.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO migrations (version, name) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    tracing::info!("Database initialization complete");
    Ok(())
}

/// Highest applied migration, 0 for a fresh database
pub async fn schema_version(conn: &mut SqliteConnection) -> Result<i64> {
    let version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM migrations")
        .fetch_one(&mut *conn)
        .await?;
    Ok(version)
}
