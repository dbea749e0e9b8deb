//! On-disk payload cache
//!
//! Fetched file bytes are kept under `cache_dir/<file_record_id>` until the
//! file reaches a terminal status, so retried enqueues and the delivery worker
//! can skip a second download. The cache is an optimization only: every
//! failure is logged and treated as a miss.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PayloadCache {
    dir: Option<PathBuf>,
}

impl PayloadCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// A cache that never stores anything
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn path(&self, id: Uuid) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(id.to_string()))
    }

    pub async fn put(&self, id: Uuid, data: &[u8]) {
        let Some(path) = self.path(id) else { return };
        let Some(dir) = self.dir() else { return };

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(error = %e, dir = %dir.display(), "Failed to create payload cache directory");
            return;
        }

        // Write then rename so readers never see a partial file
        let tmp = path.with_extension("part");
        let result = async {
            tokio::fs::write(&tmp, data).await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        match result {
            Ok(()) => debug!(file_record_id = %id, bytes = data.len(), "Cached payload"),
            Err(e) => warn!(file_record_id = %id, error = %e, "Failed to cache payload"),
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<Vec<u8>> {
        let path = self.path(id)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Some(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(file_record_id = %id, error = %e, "Failed to read cached payload");
                None
            },
        }
    }

    pub async fn remove(&self, id: Uuid) {
        let Some(path) = self.path(id) else { return };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(file_record_id = %id, "Evicted cached payload"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => warn!(file_record_id = %id, error = %e, "Failed to evict cached payload"),
        }
    }
}
