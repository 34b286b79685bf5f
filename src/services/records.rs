//! Durable DataObject store.
//!
//! SQLite holds the authoritative PID -> path mapping. The `uid` column
//! carries a UNIQUE constraint; callers regenerate the candidate PID and
//! retry when an insert collides.

use crate::models::data_object::DataObject;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("uid already assigned")]
    DuplicateUid,
    #[error("no record for uid `{0}`")]
    NotFound(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type RecordResult<T> = Result<T, RecordError>;

/// Persistence for promoted production files.
#[derive(Clone)]
pub struct RecordStore {
    db: Arc<SqlitePool>,
}

impl RecordStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new DataObject keyed by `uid`.
    ///
    /// Returns [`RecordError::DuplicateUid`] on a uniqueness violation so
    /// the caller can regenerate and retry.
    pub async fn create(&self, uid: &str, path: &str) -> RecordResult<DataObject> {
        let record = DataObject {
            id: Uuid::new_v4(),
            uid: uid.to_string(),
            path: path.to_string(),
            object_metadata: None,
            created_at: Utc::now(),
        };

        let result = sqlx::query(
            "INSERT INTO data_objects (id, uid, path, object_metadata, created_at)
             VALUES (?, ?, ?, NULL, ?)",
        )
        .bind(record.id)
        .bind(&record.uid)
        .bind(&record.path)
        .bind(record.created_at)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(record),
            Err(err) if is_unique_violation(&err) => Err(RecordError::DuplicateUid),
            Err(err) => Err(RecordError::Sqlx(err)),
        }
    }

    pub async fn find_by_uid(&self, uid: &str) -> RecordResult<Option<DataObject>> {
        let record = sqlx::query_as::<_, DataObject>(
            "SELECT id, uid, path, object_metadata, created_at
             FROM data_objects WHERE uid = ?",
        )
        .bind(uid)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    pub async fn find_by_path(&self, path: &str) -> RecordResult<Option<DataObject>> {
        let record = sqlx::query_as::<_, DataObject>(
            "SELECT id, uid, path, object_metadata, created_at
             FROM data_objects WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Attach the domain metadata map to an existing record.
    ///
    /// Runs in a transaction; any failure rolls the update back and
    /// surfaces so the caller can report `UNABLE_TO_SET_METADATA`.
    pub async fn attach_metadata(
        &self,
        uid: &str,
        metadata: &HashMap<String, String>,
    ) -> RecordResult<()> {
        let encoded = serde_json::to_string(metadata)?;
        let mut tx = self.db.begin().await?;
        let updated = sqlx::query("UPDATE data_objects SET object_metadata = ? WHERE uid = ?")
            .bind(&encoded)
            .bind(uid)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RecordError::NotFound(uid.to_string()));
        }
        tx.commit().await?;
        debug!("metadata saved for object with uid {}", uid);
        Ok(())
    }

    /// Records whose path lies under `prefix` (used by configurable
    /// cleanup eviction).
    pub async fn find_by_path_prefix(&self, prefix: &str) -> RecordResult<Vec<DataObject>> {
        let pattern = format!("{}%", prefix.trim_end_matches('/'));
        let records = sqlx::query_as::<_, DataObject>(
            "SELECT id, uid, path, object_metadata, created_at
             FROM data_objects WHERE path LIKE ?",
        )
        .bind(pattern)
        .fetch_all(&*self.db)
        .await?;
        Ok(records)
    }

    pub async fn delete_by_uid(&self, uid: &str) -> RecordResult<bool> {
        let result = sqlx::query("DELETE FROM data_objects WHERE uid = ?")
            .bind(uid)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
