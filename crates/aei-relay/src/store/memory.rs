//! In-process status store
//!
//! Same semantics as the PostgreSQL store, with every status a record has
//! held kept in an observable history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    check_transition, ApiCallRecord, Discovery, FileFilter, FileRecord, FileStatus, NewApiCall,
    NewFileRecord, StatusStore, StatusUpdate, StoreError, StoreResult,
};

#[derive(Default)]
struct State {
    files: HashMap<Uuid, FileRecord>,
    history: HashMap<Uuid, Vec<FileStatus>>,
    calls: Vec<ApiCallRecord>,
    recipients: Vec<String>,
}

#[derive(Default)]
pub struct MemoryStatusStore {
    state: Mutex<State>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recipients<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::default();
        store.set_recipients(recipients);
        store
    }

    pub fn set_recipients<I, S>(&self, recipients: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut state) = self.lock() {
            state.recipients = recipients.into_iter().map(Into::into).collect();
        }
    }

    /// Every status the record has held, in order
    pub fn status_history(&self, id: Uuid) -> Vec<FileStatus> {
        self.lock()
            .map(|state| state.history.get(&id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn all_files(&self) -> Vec<FileRecord> {
        self.lock()
            .map(|state| state.files.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Backdate a record, e.g. to make it look stale
    pub fn set_updated_at(&self, id: Uuid, at: DateTime<Utc>) {
        if let Ok(mut state) = self.lock() {
            if let Some(file) = state.files.get_mut(&id) {
                file.updated_at = at;
            }
        }
    }

    /// Backdate creation, e.g. to push a pending record past its max age
    pub fn set_created_at(&self, id: Uuid, at: DateTime<Utc>) {
        if let Ok(mut state) = self.lock() {
            if let Some(file) = state.files.get_mut(&id) {
                file.created_at = at;
            }
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Corrupt("memory store lock poisoned".to_string()))
    }
}

impl State {
    fn set_status(&mut self, id: Uuid, status: FileStatus) -> Option<FileRecord> {
        let file = self.files.get_mut(&id)?;
        file.status = status;
        file.updated_at = Utc::now();
        self.history.entry(id).or_default().push(status);
        Some(file.clone())
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn insert_discovered(&self, new: NewFileRecord) -> StoreResult<Discovery> {
        let mut state = self.lock()?;

        if let Some(existing) = state
            .files
            .values()
            .find(|f| f.filename == new.filename && f.source_location == new.source_location)
        {
            return Ok(Discovery::Existing(existing.clone()));
        }

        let now = Utc::now();
        let record = FileRecord {
            id: Uuid::new_v4(),
            filename: new.filename,
            source_location: new.source_location,
            status: FileStatus::Pending,
            site_id: new.site_id,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        state.history.insert(record.id, vec![FileStatus::Pending]);
        state.files.insert(record.id, record.clone());

        Ok(Discovery::Created(record))
    }

    async fn get_file(&self, id: Uuid) -> StoreResult<Option<FileRecord>> {
        Ok(self.lock()?.files.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: FileStatus,
        to: FileStatus,
        update: StatusUpdate,
    ) -> StoreResult<Option<FileRecord>> {
        check_transition(from, to)?;
        let mut state = self.lock()?;

        match state.files.get_mut(&id) {
            Some(file) if file.status == from => {
                file.error_message = update.error_message;
                if update.site_id.is_some() {
                    file.site_id = update.site_id;
                }
            },
            _ => return Ok(None),
        }

        Ok(state.set_status(id, to))
    }

    async fn claim_for_delivery(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<FileRecord>> {
        let mut state = self.lock()?;

        let claimable = match state.files.get(&id) {
            Some(file) => {
                file.status == FileStatus::Queued
                    || (file.status == FileStatus::Processing && file.updated_at < stale_before)
            },
            None => false,
        };
        if !claimable {
            return Ok(None);
        }

        Ok(state.set_status(id, FileStatus::Processing))
    }

    async fn record_error(&self, id: Uuid, message: &str) -> StoreResult<()> {
        let mut state = self.lock()?;
        if let Some(file) = state.files.get_mut(&id) {
            file.error_message = Some(message.to_string());
            file.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn heartbeat(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.lock()?;
        if let Some(file) = state.files.get_mut(&id) {
            file.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn renew_claim(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let mut state = self.lock()?;
        match state.files.get_mut(&id) {
            Some(file) if file.status == FileStatus::Processing && file.updated_at == claimed_at => {
                // Strictly later, so the previous holder's token never matches again
                let now = Utc::now().max(claimed_at + chrono::Duration::microseconds(1));
                file.updated_at = now;
                Ok(Some(now))
            },
            _ => Ok(None),
        }
    }

    async fn files_in_status(
        &self,
        status: FileStatus,
        updated_before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<FileRecord>> {
        let state = self.lock()?;
        let mut files: Vec<FileRecord> = state
            .files
            .values()
            .filter(|f| f.status == status)
            .filter(|f| updated_before.map_or(true, |cutoff| f.updated_at < cutoff))
            .cloned()
            .collect();
        files.sort_by_key(|f| f.created_at);
        Ok(files)
    }

    async fn list_files(&self, filter: &FileFilter) -> StoreResult<Vec<FileRecord>> {
        let state = self.lock()?;
        let mut files: Vec<FileRecord> = state
            .files
            .values()
            .filter(|f| filter.status.map_or(true, |s| f.status == s))
            .cloned()
            .collect();
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(files
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn count_files(&self, status: Option<FileStatus>) -> StoreResult<i64> {
        let state = self.lock()?;
        Ok(state
            .files
            .values()
            .filter(|f| status.map_or(true, |s| f.status == s))
            .count() as i64)
    }

    async fn insert_api_call(&self, call: NewApiCall) -> StoreResult<ApiCallRecord> {
        let mut state = self.lock()?;
        let record = ApiCallRecord {
            id: Uuid::new_v4(),
            file_record_id: call.file_record_id,
            record_index: call.record_index,
            attempt: call.attempt,
            payload: call.payload,
            response_status: call.response_status,
            response_body: call.response_body,
            error_message: call.error_message,
            created_at: Utc::now(),
        };

        state.calls.push(record.clone());
        Ok(record)
    }

    async fn api_calls_for_file(&self, file_record_id: Uuid) -> StoreResult<Vec<ApiCallRecord>> {
        let state = self.lock()?;
        Ok(state
            .calls
            .iter()
            .filter(|c| c.file_record_id == file_record_id)
            .cloned()
            .collect())
    }

    async fn recipient_emails(&self) -> StoreResult<Vec<String>> {
        Ok(self.lock()?.recipients.clone())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_file(name: &str) -> NewFileRecord {
        NewFileRecord {
            filename: name.to_string(),
            source_location: format!("ftp://reader.example.com/uploads/{}", name),
            site_id: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_discovery_returns_existing() {
        let store = MemoryStatusStore::new();

        let first = store.insert_discovered(new_file("a.csv")).await.unwrap();
        let second = store.insert_discovered(new_file("a.csv")).await.unwrap();

        assert!(matches!(first, Discovery::Created(_)));
        assert!(matches!(second, Discovery::Existing(_)));
        assert_eq!(first.record(), second.record());
        assert_eq!(store.count_files(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = MemoryStatusStore::new();
        let id = store.insert_discovered(new_file("a.csv")).await.unwrap().record().id;

        let moved = store
            .transition(id, FileStatus::Pending, FileStatus::Downloaded, StatusUpdate::default())
            .await
            .unwrap();
        assert_eq!(moved.unwrap().status, FileStatus::Downloaded);

        // Stale expectation loses
        let again = store
            .transition(id, FileStatus::Pending, FileStatus::Downloaded, StatusUpdate::default())
            .await
            .unwrap();
        assert!(again.is_none());

        assert!(matches!(
            store
                .transition(id, FileStatus::Downloaded, FileStatus::Pending, StatusUpdate::default())
                .await,
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_transition_replaces_error_message() {
        let store = MemoryStatusStore::new();
        let id = store.insert_discovered(new_file("a.csv")).await.unwrap().record().id;

        store.record_error(id, "connection refused").await.unwrap();
        let file = store
            .transition(
                id,
                FileStatus::Pending,
                FileStatus::Downloaded,
                StatusUpdate::default().with_site_id(Some("IHT0001".to_string())),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(file.error_message, None);
        assert_eq!(file.site_id.as_deref(), Some("IHT0001"));
    }

    #[tokio::test]
    async fn test_claim_only_once_unless_stale() {
        let store = MemoryStatusStore::new();
        let id = store.insert_discovered(new_file("a.csv")).await.unwrap().record().id;
        for (from, to) in [
            (FileStatus::Pending, FileStatus::Downloaded),
            (FileStatus::Downloaded, FileStatus::Queued),
        ] {
            store.transition(id, from, to, StatusUpdate::default()).await.unwrap();
        }

        let cutoff = Utc::now() - chrono::Duration::minutes(15);
        assert!(store.claim_for_delivery(id, cutoff).await.unwrap().is_some());
        assert!(store.claim_for_delivery(id, cutoff).await.unwrap().is_none());

        store.set_updated_at(id, Utc::now() - chrono::Duration::hours(1));
        assert!(store.claim_for_delivery(id, cutoff).await.unwrap().is_some());

        assert_eq!(
            store.status_history(id),
            vec![
                FileStatus::Pending,
                FileStatus::Downloaded,
                FileStatus::Queued,
                FileStatus::Processing,
                FileStatus::Processing,
            ]
        );
    }

    #[tokio::test]
    async fn test_every_call_is_kept_including_repeat_successes() {
        let store = MemoryStatusStore::new();
        let id = Uuid::new_v4();
        let call = |status| NewApiCall {
            file_record_id: id,
            record_index: 0,
            attempt: 1,
            payload: serde_json::json!({"index": 0}),
            response_status: Some(status),
            response_body: None,
            error_message: None,
        };

        store.insert_api_call(call(500)).await.unwrap();
        store.insert_api_call(call(200)).await.unwrap();
        store.insert_api_call(call(201)).await.unwrap();
        assert_eq!(store.api_calls_for_file(id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_renew_claim_only_for_current_holder() {
        let store = MemoryStatusStore::new();
        let id = store.insert_discovered(new_file("a.csv")).await.unwrap().record().id;
        for (from, to) in [
            (FileStatus::Pending, FileStatus::Downloaded),
            (FileStatus::Downloaded, FileStatus::Queued),
        ] {
            store.transition(id, from, to, StatusUpdate::default()).await.unwrap();
        }

        let first = store.claim_for_delivery(id, Utc::now()).await.unwrap().unwrap();
        let renewed = store.renew_claim(id, first.updated_at).await.unwrap().unwrap();
        assert!(renewed > first.updated_at);

        // Old token no longer matches
        assert!(store.renew_claim(id, first.updated_at).await.unwrap().is_none());

        // Taken over by another worker
        store.set_updated_at(id, Utc::now() - chrono::Duration::hours(1));
        let second = store
            .claim_for_delivery(id, Utc::now() - chrono::Duration::minutes(15))
            .await
            .unwrap()
            .unwrap();
        assert!(store.renew_claim(id, renewed).await.unwrap().is_none());
        assert!(store.renew_claim(id, second.updated_at).await.unwrap().is_some());
    }
}
