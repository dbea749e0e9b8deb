//! Feature slices of the read API
//!
//! Each feature keeps its queries (mediator requests plus a `handle`
//! function) next to the routes that dispatch them.

pub mod files;

use axum::Router;
use std::sync::Arc;

use crate::store::StatusStore;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub store: Arc<dyn StatusStore>,
}

/// Mount every feature under its path prefix
pub fn router(state: FeatureState) -> Router<()> {
    Router::new().nest("/files", files::files_routes().with_state(state.store))
}
