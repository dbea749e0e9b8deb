use mediator::Request;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::store::{ApiCallRecord, FileRecord, StatusStore, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFileQuery {
    pub id: Uuid,
}

/// A file record with every delivery attempt made for it
#[derive(Debug, Serialize)]
pub struct FileDetail {
    #[serde(flatten)]
    pub file: FileRecord,
    pub delivered_records: usize,
    pub api_calls: Vec<ApiCallRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum GetFileError {
    #[error("File record {0} not found")]
    NotFound(Uuid),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl Request<Result<FileDetail, GetFileError>> for GetFileQuery {}

#[tracing::instrument(skip(store))]
pub async fn handle(store: Arc<dyn StatusStore>, query: GetFileQuery) -> Result<FileDetail, GetFileError> {
    let file = store
        .get_file(query.id)
        .await?
        .ok_or(GetFileError::NotFound(query.id))?;

    let api_calls = store.api_calls_for_file(file.id).await?;
    let delivered_records = api_calls
        .iter()
        .filter(|call| call.is_success())
        .map(|call| call.record_index)
        .collect::<HashSet<_>>()
        .len();

    Ok(FileDetail {
        file,
        delivered_records,
        api_calls,
    })
}
