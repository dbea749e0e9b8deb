//! PostgreSQL status store
//!
//! Uses runtime-checked queries so the crate builds without a live database.
//! Status changes are single `UPDATE ... WHERE status = $from RETURNING *`
//! statements; an empty result means another actor won the race.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    check_transition, ApiCallRecord, Discovery, FileFilter, FileRecord, FileStatus, NewApiCall,
    NewFileRecord, StatusStore, StatusUpdate, StoreError, StoreResult,
};

const FILE_COLUMNS: &str =
    "id, filename, source_location, status, site_id, error_message, created_at, updated_at";

const API_CALL_COLUMNS: &str = "id, file_record_id, record_index, attempt, payload, \
     response_status, response_body, error_message, created_at";

#[derive(Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Raw `file_records` row; `status` is stored as text
#[derive(sqlx::FromRow)]
struct FileRecordRow {
    id: Uuid,
    filename: String,
    source_location: String,
    status: String,
    site_id: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<FileRecordRow> for FileRecord {
    type Error = StoreError;

    fn try_from(row: FileRecordRow) -> Result<Self, Self::Error> {
        Ok(FileRecord {
            id: row.id,
            filename: row.filename,
            source_location: row.source_location,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            site_id: row.site_id,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_records(rows: Vec<FileRecordRow>) -> StoreResult<Vec<FileRecord>> {
    rows.into_iter().map(FileRecord::try_from).collect()
}

fn into_record(row: Option<FileRecordRow>) -> StoreResult<Option<FileRecord>> {
    row.map(FileRecord::try_from).transpose()
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn insert_discovered(&self, new: NewFileRecord) -> StoreResult<Discovery> {
        let inserted = sqlx::query_as::<_, FileRecordRow>(&format!(
            r#"
            INSERT INTO file_records (id, filename, source_location, status, site_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (filename, source_location) DO NOTHING
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.filename)
        .bind(&new.source_location)
        .bind(FileStatus::Pending.as_str())
        .bind(&new.site_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(Discovery::Created(row.try_into()?));
        }

        let existing = sqlx::query_as::<_, FileRecordRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM file_records WHERE filename = $1 AND source_location = $2"
        ))
        .bind(&new.filename)
        .bind(&new.source_location)
        .fetch_one(&self.pool)
        .await?;

        Ok(Discovery::Existing(existing.try_into()?))
    }

    async fn get_file(&self, id: Uuid) -> StoreResult<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRecordRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM file_records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        into_record(row)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: FileStatus,
        to: FileStatus,
        update: StatusUpdate,
    ) -> StoreResult<Option<FileRecord>> {
        check_transition(from, to)?;

        let row = sqlx::query_as::<_, FileRecordRow>(&format!(
            r#"
            UPDATE file_records
            SET status = $3,
                error_message = $4,
                site_id = COALESCE($5, site_id),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(&update.error_message)
        .bind(&update.site_id)
        .fetch_optional(&self.pool)
        .await?;

        into_record(row)
    }

    async fn claim_for_delivery(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRecordRow>(&format!(
            r#"
            UPDATE file_records
            SET status = 'processing', updated_at = NOW()
            WHERE id = $1
              AND (status = 'queued' OR (status = 'processing' AND updated_at < $2))
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;

        into_record(row)
    }

    async fn record_error(&self, id: Uuid, message: &str) -> StoreResult<()> {
        sqlx::query("UPDATE file_records SET error_message = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn heartbeat(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE file_records SET updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn renew_claim(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let renewed: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            UPDATE file_records
            SET updated_at = GREATEST(clock_timestamp(), updated_at + INTERVAL '1 microsecond')
            WHERE id = $1 AND status = 'processing' AND updated_at = $2
            RETURNING updated_at
            "#,
        )
        .bind(id)
        .bind(claimed_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(renewed)
    }

    async fn files_in_status(
        &self,
        status: FileStatus,
        updated_before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRecordRow>(&format!(
            r#"
            SELECT {FILE_COLUMNS}
            FROM file_records
            WHERE status = $1 AND ($2::timestamptz IS NULL OR updated_at < $2)
            ORDER BY created_at ASC
            "#
        ))
        .bind(status.as_str())
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn list_files(&self, filter: &FileFilter) -> StoreResult<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRecordRow>(&format!(
            r#"
            SELECT {FILE_COLUMNS}
            FROM file_records
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit())
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn count_files(&self, status: Option<FileStatus>) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM file_records WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn insert_api_call(&self, call: NewApiCall) -> StoreResult<ApiCallRecord> {
        let record = sqlx::query_as::<_, ApiCallRecord>(&format!(
            r#"
            INSERT INTO api_call_records
                (id, file_record_id, record_index, attempt, payload,
                 response_status, response_body, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {API_CALL_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(call.file_record_id)
        .bind(call.record_index)
        .bind(call.attempt)
        .bind(&call.payload)
        .bind(call.response_status)
        .bind(&call.response_body)
        .bind(&call.error_message)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn api_calls_for_file(&self, file_record_id: Uuid) -> StoreResult<Vec<ApiCallRecord>> {
        let calls = sqlx::query_as::<_, ApiCallRecord>(&format!(
            r#"
            SELECT {API_CALL_COLUMNS}
            FROM api_call_records
            WHERE file_record_id = $1
            ORDER BY record_index ASC, attempt ASC, created_at ASC
            "#
        ))
        .bind(file_record_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(calls)
    }

    async fn recipient_emails(&self) -> StoreResult<Vec<String>> {
        let emails: Vec<String> = sqlx::query_scalar(
            "SELECT email FROM email_configs WHERE email IS NOT NULL AND email <> '' ORDER BY email",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(emails)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
