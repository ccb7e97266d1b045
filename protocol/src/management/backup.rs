use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One snapshot directory. Immutable once created; only deletable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    /// Directory name: `<label-or-"backup">-<sanitized timestamp>`.
    pub id: String,
    pub created: DateTime<Utc>,
    pub size: u64,
    pub path: PathBuf,
}

/// What happens to an instance's backups when the instance is deleted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetentionPolicy {
    DeleteAll,
    KeepLatest,
    KeepAll,
}
