use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::PaginationMeta;
use crate::store::{FileFilter, FileRecord, FileStatus, StatusStore, StoreError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilesQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FileStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListFilesResponse {
    pub items: Vec<FileRecord>,
    pub pagination: PaginationMeta,
}

#[derive(Debug, thiserror::Error)]
pub enum ListFilesError {
    #[error("Limit must be between 1 and {}", FileFilter::MAX_LIMIT)]
    InvalidLimit,
    #[error("Offset must not be negative")]
    InvalidOffset,
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl Request<Result<ListFilesResponse, ListFilesError>> for ListFilesQuery {}

impl ListFilesQuery {
    pub fn validate(&self) -> Result<(), ListFilesError> {
        if let Some(limit) = self.limit {
            if !(1..=FileFilter::MAX_LIMIT).contains(&limit) {
                return Err(ListFilesError::InvalidLimit);
            }
        }
        if self.offset.is_some_and(|offset| offset < 0) {
            return Err(ListFilesError::InvalidOffset);
        }
        Ok(())
    }
}

#[tracing::instrument(skip(store))]
pub async fn handle(
    store: Arc<dyn StatusStore>,
    query: ListFilesQuery,
) -> Result<ListFilesResponse, ListFilesError> {
    query.validate()?;

    let filter = FileFilter {
        status: query.status,
        limit: query.limit,
        offset: query.offset,
    };

    let items = store.list_files(&filter).await?;
    let total = store.count_files(filter.status).await?;

    Ok(ListFilesResponse {
        items,
        pagination: PaginationMeta::new(filter.limit(), filter.offset(), total),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStatusStore, NewFileRecord};

    #[test]
    fn test_validation() {
        assert!(ListFilesQuery::default().validate().is_ok());
        let query = ListFilesQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert!(matches!(query.validate(), Err(ListFilesError::InvalidLimit)));
        let query = ListFilesQuery {
            offset: Some(-1),
            ..Default::default()
        };
        assert!(matches!(query.validate(), Err(ListFilesError::InvalidOffset)));
    }

    #[tokio::test]
    async fn test_list_with_status_filter() {
        let store = Arc::new(MemoryStatusStore::new());
        for name in ["a.csv", "b.csv", "c.csv"] {
            store
                .insert_discovered(NewFileRecord {
                    filename: name.to_string(),
                    source_location: format!("ftp://reader/uploads/{}", name),
                    site_id: None,
                })
                .await
                .unwrap();
        }

        let response = handle(
            store.clone(),
            ListFilesQuery {
                status: Some(FileStatus::Pending),
                limit: Some(2),
                offset: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(response.items.len(), 2);
        assert_eq!(response.pagination.total, 3);
        assert!(response.pagination.has_more);

        let response = handle(
            store,
            ListFilesQuery {
                status: Some(FileStatus::Processed),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(response.items.is_empty());
        assert_eq!(response.pagination.total, 0);
    }
}
