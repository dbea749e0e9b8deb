//! File status routes
//!
//! - `GET /api/v1/files?status=&limit=&offset=` - list file records, newest first
//! - `GET /api/v1/files/:id` - one file record with its API call history

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::queries::{GetFileError, GetFileQuery, ListFilesError, ListFilesQuery};
use crate::api::response::{ApiResponse, ErrorResponse};
use crate::store::StatusStore;

pub fn files_routes() -> Router<Arc<dyn StatusStore>> {
    Router::new()
        .route("/", get(list_files))
        .route("/:id", get(get_file))
}

#[tracing::instrument(
    skip(store, query),
    fields(status = ?query.status, limit = ?query.limit, offset = ?query.offset)
)]
async fn list_files(
    State(store): State<Arc<dyn StatusStore>>,
    Query(query): Query<ListFilesQuery>,
) -> Result<Response, FilesApiError> {
    let response = super::queries::list::handle(store, query).await?;

    tracing::debug!(
        count = response.items.len(),
        total = response.pagination.total,
        "Files listed via API"
    );

    let meta = json!({ "pagination": response.pagination });

    Ok(
        (StatusCode::OK, Json(ApiResponse::success_with_meta(response.items, meta)))
            .into_response(),
    )
}

#[tracing::instrument(skip(store), fields(id = %id))]
async fn get_file(
    State(store): State<Arc<dyn StatusStore>>,
    Path(id): Path<Uuid>,
) -> Result<Response, FilesApiError> {
    let response = super::queries::get::handle(store, GetFileQuery { id }).await?;

    Ok((StatusCode::OK, Json(ApiResponse::success(response))).into_response())
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
enum FilesApiError {
    List(ListFilesError),
    Get(GetFileError),
}

impl From<ListFilesError> for FilesApiError {
    fn from(err: ListFilesError) -> Self {
        Self::List(err)
    }
}

impl From<GetFileError> for FilesApiError {
    fn from(err: GetFileError) -> Self {
        Self::Get(err)
    }
}

impl IntoResponse for FilesApiError {
    fn into_response(self) -> Response {
        match self {
            FilesApiError::List(
                ref err @ (ListFilesError::InvalidLimit | ListFilesError::InvalidOffset),
            ) => {
                let error = ErrorResponse::new("VALIDATION_ERROR", err.to_string());
                (StatusCode::BAD_REQUEST, Json(error)).into_response()
            },
            FilesApiError::Get(GetFileError::NotFound(id)) => {
                let error =
                    ErrorResponse::new("NOT_FOUND", format!("File record '{}' not found", id));
                (StatusCode::NOT_FOUND, Json(error)).into_response()
            },
            FilesApiError::List(ListFilesError::Store(ref e))
            | FilesApiError::Get(GetFileError::Store(ref e)) => {
                tracing::error!("Store error in files API: {}", e);
                let error = ErrorResponse::new("INTERNAL_ERROR", "A database error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            },
        }
    }
}
