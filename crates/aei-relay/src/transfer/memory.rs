//! In-memory transfer endpoint
//!
//! A source directory and an archive directory held in maps, with knobs to
//! inject transient failures. Backs the pipeline tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::{Cursor, FileDescriptor, TransferClient, TransferError};

#[derive(Debug, Clone)]
struct StoredFile {
    data: Vec<u8>,
    modified_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    source: BTreeMap<String, StoredFile>,
    archive: BTreeMap<String, StoredFile>,
    /// Remaining transient failures per filename
    fetch_failures: HashMap<String, u32>,
    list_unavailable: bool,
    consume_unavailable: bool,
    fetch_calls: u32,
}

pub struct MemoryTransferClient {
    host: String,
    state: Mutex<State>,
}

impl Default for MemoryTransferClient {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryTransferClient {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn location(&self, filename: &str) -> String {
        format!("ftp://{}/uploads/{}", self.host, filename)
    }

    pub fn put(&self, filename: &str, data: impl Into<Vec<u8>>) {
        self.put_at(filename, data, Utc::now());
    }

    pub fn put_at(&self, filename: &str, data: impl Into<Vec<u8>>, modified_at: DateTime<Utc>) {
        self.with_state(|state| {
            state.source.insert(
                filename.to_string(),
                StoredFile {
                    data: data.into(),
                    modified_at,
                },
            );
        });
    }

    /// Delete from both directories, as if someone removed it by hand
    pub fn remove(&self, filename: &str) {
        self.with_state(|state| {
            state.source.remove(filename);
            state.archive.remove(filename);
        });
    }

    /// Make the next `count` fetches of `filename` fail as unavailable
    pub fn fail_fetches(&self, filename: &str, count: u32) {
        self.with_state(|state| {
            state.fetch_failures.insert(filename.to_string(), count);
        });
    }

    pub fn set_list_unavailable(&self, unavailable: bool) {
        self.with_state(|state| state.list_unavailable = unavailable);
    }

    pub fn set_consume_unavailable(&self, unavailable: bool) {
        self.with_state(|state| state.consume_unavailable = unavailable);
    }

    pub fn is_archived(&self, filename: &str) -> bool {
        self.with_state(|state| state.archive.contains_key(filename) && !state.source.contains_key(filename))
    }

    pub fn fetch_calls(&self) -> u32 {
        self.with_state(|state| state.fetch_calls)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait]
impl TransferClient for MemoryTransferClient {
    async fn list_new_files(&self, since: &Cursor) -> Result<Vec<FileDescriptor>, TransferError> {
        self.with_state(|state| {
            if state.list_unavailable {
                return Err(TransferError::Unavailable("listing disabled".to_string()));
            }
            Ok(state
                .source
                .iter()
                .filter(|(_, file)| since.admits(Some(file.modified_at)))
                .map(|(name, file)| FileDescriptor {
                    filename: name.clone(),
                    location: self.location(name),
                    size: Some(file.data.len() as u64),
                    modified_at: Some(file.modified_at),
                })
                .collect())
        })
    }

    async fn fetch(&self, file: &FileDescriptor) -> Result<Vec<u8>, TransferError> {
        self.with_state(|state| {
            state.fetch_calls += 1;

            if let Some(remaining) = state.fetch_failures.get_mut(&file.filename) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransferError::Unavailable(format!(
                        "{}: connection reset",
                        file.filename
                    )));
                }
            }

            state
                .source
                .get(&file.filename)
                .or_else(|| state.archive.get(&file.filename))
                .map(|stored| stored.data.clone())
                .ok_or_else(|| TransferError::NotFound(file.location.clone()))
        })
    }

    async fn mark_consumed(&self, file: &FileDescriptor) -> Result<(), TransferError> {
        self.with_state(|state| {
            if state.consume_unavailable {
                return Err(TransferError::Unavailable("rename refused".to_string()));
            }
            match state.source.remove(&file.filename) {
                Some(stored) => {
                    state.archive.insert(file.filename.clone(), stored);
                    Ok(())
                },
                None if state.archive.contains_key(&file.filename) => Ok(()),
                None => Err(TransferError::NotFound(file.location.clone())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_is_stable_until_consumed() {
        let client = MemoryTransferClient::default();
        client.put("a.csv", "header\n");
        client.put("b.csv", "header\n");

        let first = client.list_new_files(&Cursor::all()).await.unwrap();
        let second = client.list_new_files(&Cursor::all()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);

        client.mark_consumed(&first[0]).await.unwrap();
        client.mark_consumed(&first[0]).await.unwrap();
        let third = client.list_new_files(&Cursor::all()).await.unwrap();
        assert_eq!(third.len(), 1);
        assert!(client.is_archived("a.csv"));

        // Archived files remain fetchable
        assert_eq!(client.fetch(&first[0]).await.unwrap(), b"header\n");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let client = MemoryTransferClient::default();
        client.put("a.csv", "x");
        client.fail_fetches("a.csv", 1);
        let file = FileDescriptor::new("a.csv", client.location("a.csv"));

        assert!(client.fetch(&file).await.unwrap_err().is_retryable());
        assert!(client.fetch(&file).await.is_ok());

        client.remove("a.csv");
        assert!(matches!(
            client.fetch(&file).await,
            Err(TransferError::NotFound(_))
        ));
        assert_eq!(client.fetch_calls(), 3);
    }
}
