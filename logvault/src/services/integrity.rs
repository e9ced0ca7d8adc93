//! Drift detection between metadata rows and blob files
//!
//! Read-only: reports what disagrees and leaves repair to an operator.

use crate::error::Result;
use crate::storage::BlobStore;
use serde::Serialize;
use std::collections::BTreeSet;

/// Result of comparing one table's ids with one blob directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    /// Blob files with no metadata row (leaks)
    pub orphan_blobs: Vec<i64>,
    /// Metadata rows with no blob file (reads will fail)
    pub missing_blobs: Vec<i64>,
    /// Staged uploads still present in the directory
    pub temp_files: usize,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_blobs.is_empty() && self.missing_blobs.is_empty()
    }
}

/// Compare `record_ids` against the blobs present in `blob_store`.
///
/// The ids and the directory listing are two separate reads, so an upload
/// in progress can show as a blob without a row. Pass the report through
/// [`confirm_orphans`] with a fresh id read before acting on it. A row whose
/// blob is still being published is reported missing.
pub async fn find_drift(record_ids: &[i64], blob_store: &BlobStore) -> Result<DriftReport> {
    let rows: BTreeSet<i64> = record_ids.iter().copied().collect();
    let blobs: BTreeSet<i64> = blob_store.list_ids().await?.into_iter().collect();

    Ok(DriftReport {
        orphan_blobs: blobs.difference(&rows).copied().collect(),
        missing_blobs: rows.difference(&blobs).copied().collect(),
        temp_files: blob_store.list_temp_files().await?.len(),
    })
}

/// Drop orphan candidates that gained a row or lost their blob since the scan
pub async fn confirm_orphans(
    report: &mut DriftReport,
    record_ids: &[i64],
    blob_store: &BlobStore,
) -> Result<()> {
    let rows: BTreeSet<i64> = record_ids.iter().copied().collect();

    let mut confirmed = Vec::with_capacity(report.orphan_blobs.len());
    for &id in &report.orphan_blobs {
        if !rows.contains(&id) && blob_store.exists(id).await? {
            confirmed.push(id);
        } else {
            tracing::debug!("Blob {} changed during audit, not an orphan", id);
        }
    }
    report.orphan_blobs = confirmed;
    Ok(())
}

pub fn log_report(kind: &str, report: &DriftReport) {
    for id in &report.orphan_blobs {
        tracing::warn!("Orphan {} blob {} has no metadata row", kind, id);
    }
    for id in &report.missing_blobs {
        tracing::warn!("{} record {} has no blob data", kind, id);
    }

    tracing::info!(
        "Audited {} store: {} orphan, {} missing, {} temp",
        kind,
        report.orphan_blobs.len(),
        report.missing_blobs.len(),
        report.temp_files
    );
}
