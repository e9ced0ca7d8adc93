// logvault - maintenance entry point
// Sweeps abandoned uploads and reports drift between metadata and blobs.

use anyhow::Context;
use logvault::{AppState, StoreConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logvault=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting logvault maintenance");

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => StoreConfig::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => StoreConfig::default(),
    };

    let state = AppState::initialize(config)
        .await
        .context("failed to initialize storage")?;

    state.sweep_stale_uploads().await?;

    let attachments = state.attachments.audit().await?;
    let imports = state.imports.audit().await?;

    println!("attachments: {}", serde_json::to_string(&attachments)?);
    println!("imports: {}", serde_json::to_string(&imports)?);

    if !attachments.is_clean() || !imports.is_clean() {
        tracing::warn!("Drift detected; see report above");
    }

    state.close().await;

    Ok(())
}
