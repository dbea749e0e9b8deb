//! Transfer client
//!
//! The only component that talks to the reader upload endpoint. Files are
//! listed from a source directory, fetched by descriptor, and archived once
//! their content is durably queued.

pub mod ftp;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use ftp::{FtpConfig, FtpTransferClient};
pub use memory::MemoryTransferClient;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Connection, authentication or I/O failure; worth retrying
    #[error("transfer endpoint unavailable: {0}")]
    Unavailable(String),

    /// The file is gone from the endpoint; retrying will not help
    #[error("file not found: {0}")]
    NotFound(String),
}

impl TransferError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Unavailable(_))
    }
}

/// Lower bound on what discovery should return
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Skip files whose known modification time is older than this
    pub not_before: Option<DateTime<Utc>>,
}

impl Cursor {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(not_before: DateTime<Utc>) -> Self {
        Self {
            not_before: Some(not_before),
        }
    }

    pub fn admits(&self, modified_at: Option<DateTime<Utc>>) -> bool {
        match (self.not_before, modified_at) {
            (Some(cutoff), Some(modified)) => modified >= cutoff,
            _ => true,
        }
    }
}

/// A file on the endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub filename: String,
    /// Stable URI, e.g. `ftp://reader.example.com/uploads/202109150646-0001-IHT0001_0022.csv`
    pub location: String,
    pub size: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl FileDescriptor {
    pub fn new(filename: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            location: location.into(),
            size: None,
            modified_at: None,
        }
    }
}

#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Files currently waiting in the source directory.
    ///
    /// Repeated calls with the same cursor return the same set until
    /// [`TransferClient::mark_consumed`] is called.
    async fn list_new_files(&self, since: &Cursor) -> Result<Vec<FileDescriptor>, TransferError>;

    async fn fetch(&self, file: &FileDescriptor) -> Result<Vec<u8>, TransferError>;

    /// Archive the file so it is not discovered again. Idempotent.
    async fn mark_consumed(&self, file: &FileDescriptor) -> Result<(), TransferError>;
}

/// Fetch, retrying [`TransferError::Unavailable`] with linear backoff.
///
/// `NotFound` is returned immediately.
pub async fn fetch_with_retry(
    client: &dyn TransferClient,
    file: &FileDescriptor,
    max_attempts: u32,
    backoff: Duration,
) -> Result<Vec<u8>, TransferError> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match client.fetch(file).await {
            Ok(data) => return Ok(data),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff * attempt;
                warn!(
                    filename = %file.filename,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Fetch failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cursor_admits() {
        let now = Utc::now();
        let cursor = Cursor::since(now - Duration::hours(24));

        assert!(cursor.admits(Some(now)));
        assert!(!cursor.admits(Some(now - Duration::hours(25))));
        // Unknown modification time is never filtered
        assert!(cursor.admits(None));
        assert!(Cursor::all().admits(Some(now - Duration::days(365))));
    }

    #[tokio::test]
    async fn test_fetch_with_retry_gives_up() {
        let client = MemoryTransferClient::default();
        client.put("a.csv", "x");
        client.fail_fetches("a.csv", 5);
        let file = FileDescriptor::new("a.csv", client.location("a.csv"));

        let err = fetch_with_retry(&client, &file, 3, std::time::Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(client.fetch_calls(), 3);

        client.remove("a.csv");
        let err = fetch_with_retry(&client, &file, 3, std::time::Duration::from_millis(1))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::NotFound(client.location("a.csv")));
        assert_eq!(client.fetch_calls(), 4);
    }
}
