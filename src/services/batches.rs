//! Batch readiness evaluation.
//!
//! A batch has no stored state flag: its readiness is recomputed on every
//! read as a pure function of the storage-backend listing and the local
//! staging directory.

use crate::services::storage::{ObjectInfo, StorageBackend, StorageResult};
use serde::Serialize;
use std::path::Path;
use tokio::fs;

/// Readiness of a batch, derived from current storage state.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Backend collection or local staging directory does not exist.
    Missing,
    /// Batch exists but no file has been delivered yet.
    NotFilled,
    /// The archive was downloaded locally but not committed to the backend.
    PartiallyEnabled,
    /// Exactly one file object is committed; the batch is ready.
    Enabled,
    /// More than one file object: contract violation.
    Misconfigured,
}

/// Classify a batch and return the backend listing alongside.
///
/// Exactly one file object is expected per batch collection; anything
/// else maps onto the degraded states above.
pub async fn batch_status(
    storage: &dyn StorageBackend,
    collection: &str,
    local_path: &Path,
) -> StorageResult<(BatchStatus, Vec<ObjectInfo>)> {
    if !storage.is_collection(collection).await? || !fs::try_exists(local_path).await? {
        return Ok((BatchStatus::Missing, Vec::new()));
    }

    let listing = storage.list(collection).await?;
    let file_count = listing.iter().filter(|o| o.is_dataobject()).count();

    if file_count > 1 {
        return Ok((BatchStatus::Misconfigured, listing));
    }
    if file_count == 1 {
        return Ok((BatchStatus::Enabled, listing));
    }

    let mut local_files = 0usize;
    let mut dir = fs::read_dir(local_path).await?;
    while let Some(entry) = dir.next_entry().await? {
        if entry.metadata().await?.is_file() {
            local_files += 1;
        }
    }

    if local_files == 0 {
        Ok((BatchStatus::NotFilled, listing))
    } else {
        Ok((BatchStatus::PartiallyEnabled, listing))
    }
}
