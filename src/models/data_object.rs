//! Represents a promoted production file and its persistent identifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

/// The authoritative PID -> path mapping for one production file.
///
/// A row is created when a verified batch file is promoted into the
/// production collection; it is never mutated afterwards except for the
/// metadata attach step. The `uid` is globally unique and collisions on
/// insert trigger regeneration of the candidate identifier.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct DataObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Globally unique persistent identifier (`<prefix>/<uuid>`).
    pub uid: String,

    /// Storage-backend path of the production copy.
    pub path: String,

    /// Domain metadata as a JSON object, attached after PID assignment.
    pub object_metadata: Option<String>,

    /// When this record was created.
    pub created_at: DateTime<Utc>,
}

impl DataObject {
    /// Decode the metadata column into a key/value map.
    pub fn metadata_map(&self) -> HashMap<String, String> {
        self.object_metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}
