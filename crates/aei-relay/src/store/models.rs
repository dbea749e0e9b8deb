//! Persisted entities
//!
//! `FileRecord` maps to `file_records`, `ApiCallRecord` to `api_call_records`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a source file.
///
/// Statuses are ordered; a file only moves to a later status, except that
/// `Failed` is reachable from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Downloaded,
    Queued,
    Processing,
    Processed,
    Failed,
}

impl FileStatus {
    pub const ALL: [FileStatus; 6] = [
        FileStatus::Pending,
        FileStatus::Downloaded,
        FileStatus::Queued,
        FileStatus::Processing,
        FileStatus::Processed,
        FileStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Downloaded => "downloaded",
            FileStatus::Queued => "queued",
            FileStatus::Processing => "processing",
            FileStatus::Processed => "processed",
            FileStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Processed | FileStatus::Failed)
    }

    /// Whether a compare-and-set from `self` to `next` respects the lifecycle
    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            FileStatus::Failed => true,
            _ => next > *self,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown file status: {}", s))
    }
}

/// One source file and where it is in the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub filename: String,
    pub source_location: String,
    pub status: FileStatus,
    pub site_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields known at discovery time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileRecord {
    pub filename: String,
    pub source_location: String,
    pub site_id: Option<String>,
}

/// Outcome of inserting a discovered file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    Created(FileRecord),
    /// `(filename, source_location)` was already tracked; returned unchanged
    Existing(FileRecord),
}

impl Discovery {
    pub fn record(&self) -> &FileRecord {
        match self {
            Discovery::Created(record) | Discovery::Existing(record) => record,
        }
    }

    pub fn into_record(self) -> FileRecord {
        match self {
            Discovery::Created(record) | Discovery::Existing(record) => record,
        }
    }
}

/// Column changes applied together with a status transition.
///
/// `error_message` always replaces the stored value, so a forward transition
/// with `None` clears an error left by an earlier retried step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub site_id: Option<String>,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            site_id: None,
            error_message: Some(message.into()),
        }
    }

    pub fn with_site_id(mut self, site_id: Option<String>) -> Self {
        self.site_id = site_id;
        self
    }
}

/// One attempt to forward one record downstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiCallRecord {
    pub id: Uuid,
    pub file_record_id: Uuid,
    pub record_index: i32,
    pub attempt: i32,
    pub payload: serde_json::Value,
    /// `None` when no HTTP response was received (timeout, connection error)
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApiCallRecord {
    pub fn is_success(&self) -> bool {
        self.response_status
            .map(|status| (200..300).contains(&status))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewApiCall {
    pub file_record_id: Uuid,
    pub record_index: i32,
    pub attempt: i32,
    pub payload: serde_json::Value,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
}

/// Paging and filtering for the read API
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileFilter {
    pub status: Option<FileStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl FileFilter {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 500;

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}
