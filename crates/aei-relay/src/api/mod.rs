//! Read-only HTTP API
//!
//! - `GET /health` - database connectivity
//! - `GET /api/v1/files` - file records, newest first
//! - `GET /api/v1/files/:id` - one file with its call history

pub mod response;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::features::{self, FeatureState};
use crate::middleware;
use crate::store::StatusStore;

/// Build the application router with all routes and middleware
pub fn router(store: Arc<dyn StatusStore>) -> Router {
    let feature_routes = features::router(FeatureState {
        store: store.clone(),
    });

    Router::new()
        .route("/health", get(health_check))
        .with_state(store)
        .nest("/api/v1", feature_routes)
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer())
}

/// Health check handler
async fn health_check(State(store): State<Arc<dyn StatusStore>>) -> Result<Response, StatusCode> {
    match store.ping().await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStatusStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_check() {
        let app = router(Arc::new(MemoryStatusStore::new()));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
