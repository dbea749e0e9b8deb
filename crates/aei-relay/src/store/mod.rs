//! Status store
//!
//! Durable record of every discovered file and every downstream call. It is
//! the only state shared between coordinator runs and delivery workers, so
//! every status change is a compare-and-set on the current status.
//!
//! - [`PgStatusStore`]: PostgreSQL via sqlx, schema in `migrations/`
//! - [`MemoryStatusStore`]: in-process, for tests and dry runs

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStatusStore;
pub use models::{
    ApiCallRecord, Discovery, FileFilter, FileRecord, FileStatus, NewApiCall, NewFileRecord,
    StatusUpdate,
};
pub use postgres::PgStatusStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition { from: FileStatus, to: FileStatus },

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Insert a `Pending` record, or return the existing one for the same
    /// `(filename, source_location)` unchanged.
    async fn insert_discovered(&self, new: NewFileRecord) -> StoreResult<Discovery>;

    async fn get_file(&self, id: Uuid) -> StoreResult<Option<FileRecord>>;

    /// Move `id` from `from` to `to` if it is still in `from`.
    ///
    /// Returns `None` when the record is missing or another actor moved it
    /// first. Transitions that break the lifecycle order are rejected.
    async fn transition(
        &self,
        id: Uuid,
        from: FileStatus,
        to: FileStatus,
        update: StatusUpdate,
    ) -> StoreResult<Option<FileRecord>>;

    /// Claim a file for delivery: `Queued -> Processing`, or re-claim a
    /// `Processing` file whose last update is older than `stale_before`.
    async fn claim_for_delivery(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<FileRecord>>;

    /// Attach an error to a record without changing its status
    async fn record_error(&self, id: Uuid, message: &str) -> StoreResult<()>;

    /// Refresh `updated_at` so an in-progress record is not considered stale
    async fn heartbeat(&self, id: Uuid) -> StoreResult<()>;

    /// Extend a delivery claim held since `claimed_at`.
    ///
    /// Returns the new claim timestamp, or `None` when the record left
    /// `Processing` or another worker re-claimed it in the meantime.
    async fn renew_claim(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    /// Records in `status`, optionally only those not updated since `updated_before`,
    /// oldest first
    async fn files_in_status(
        &self,
        status: FileStatus,
        updated_before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<FileRecord>>;

    /// Newest first
    async fn list_files(&self, filter: &FileFilter) -> StoreResult<Vec<FileRecord>>;

    async fn count_files(&self, status: Option<FileStatus>) -> StoreResult<i64>;

    async fn insert_api_call(&self, call: NewApiCall) -> StoreResult<ApiCallRecord>;

    /// Oldest first
    async fn api_calls_for_file(&self, file_record_id: Uuid) -> StoreResult<Vec<ApiCallRecord>>;

    /// Notification recipients, read on every call
    async fn recipient_emails(&self) -> StoreResult<Vec<String>>;

    async fn ping(&self) -> StoreResult<()>;
}

pub(crate) fn check_transition(from: FileStatus, to: FileStatus) -> StoreResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition { from, to })
    }
}
