//! Hand-off queue between the coordinator and delivery workers
//!
//! A message only identifies a file; workers re-derive everything else from
//! the status store, so at-least-once redelivery is harmless.

use apalis::prelude::*;
use apalis_postgres::PostgresStorage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::store::FileRecord;

/// Delivery job payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub file_record_id: Uuid,
    pub source_location: String,
    pub discovered_at: DateTime<Utc>,
}

impl QueueMessage {
    pub fn for_file(file: &FileRecord) -> Self {
        Self {
            file_record_id: file.id,
            source_location: file.source_location.clone(),
            discovered_at: file.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("enqueue failed: {0}")]
    Enqueue(String),
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn enqueue(&self, message: QueueMessage) -> Result<(), QueueError>;
}

/// Durable queue backed by apalis' PostgreSQL storage
#[derive(Clone)]
pub struct ApalisQueue {
    storage: PostgresStorage<QueueMessage>,
}

impl ApalisQueue {
    pub fn new(pool: &PgPool) -> Self {
        Self {
            storage: PostgresStorage::new(pool),
        }
    }

    pub fn storage(&self) -> PostgresStorage<QueueMessage> {
        self.storage.clone()
    }
}

#[async_trait]
impl MessageQueue for ApalisQueue {
    async fn enqueue(&self, message: QueueMessage) -> Result<(), QueueError> {
        let mut storage = self.storage.clone();
        storage
            .push(message)
            .await
            .map_err(|e| QueueError::Enqueue(e.to_string()))?;
        Ok(())
    }
}

/// In-process FIFO; messages are drained by the caller
#[derive(Default)]
pub struct MemoryQueue {
    messages: Mutex<VecDeque<QueueMessage>>,
    unavailable: Mutex<bool>,
    failures_left: Mutex<u32>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut flag) = self.unavailable.lock() {
            *flag = unavailable;
        }
    }

    /// Make the next `count` enqueues fail
    pub fn fail_enqueues(&self, count: u32) {
        if let Ok(mut left) = self.failures_left.lock() {
            *left = count;
        }
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn drain(&self) -> Vec<QueueMessage> {
        self.messages
            .lock()
            .map(|mut m| m.drain(..).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn enqueue(&self, message: QueueMessage) -> Result<(), QueueError> {
        if self.unavailable.lock().map(|flag| *flag).unwrap_or(false) {
            return Err(QueueError::Enqueue("queue unavailable".to_string()));
        }
        if let Ok(mut left) = self.failures_left.lock() {
            if *left > 0 {
                *left -= 1;
                return Err(QueueError::Enqueue("connection reset".to_string()));
            }
        }
        self.messages
            .lock()
            .map_err(|_| QueueError::Enqueue("queue lock poisoned".to_string()))?
            .push_back(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_queue_fifo_and_outage() {
        let queue = MemoryQueue::new();
        let message = |n: u128| QueueMessage {
            file_record_id: Uuid::from_u128(n),
            source_location: format!("ftp://reader/uploads/{}.csv", n),
            discovered_at: Utc::now(),
        };

        queue.enqueue(message(1)).await.unwrap();
        queue.enqueue(message(2)).await.unwrap();

        queue.set_unavailable(true);
        assert!(queue.enqueue(message(3)).await.is_err());

        let drained = queue.drain();
        assert_eq!(
            drained.iter().map(|m| m.file_record_id).collect::<Vec<_>>(),
            vec![Uuid::from_u128(1), Uuid::from_u128(2)]
        );
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_memory_queue_injected_failures_run_out() {
        let queue = MemoryQueue::new();
        let message = QueueMessage {
            file_record_id: Uuid::from_u128(7),
            source_location: "ftp://reader/uploads/7.csv".to_string(),
            discovered_at: Utc::now(),
        };

        queue.fail_enqueues(2);
        assert!(queue.enqueue(message.clone()).await.is_err());
        assert!(queue.enqueue(message.clone()).await.is_err());
        queue.enqueue(message).await.unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_message_serializes_identifiers_only() {
        let message = QueueMessage {
            file_record_id: Uuid::nil(),
            source_location: "ftp://reader/uploads/a.csv".to_string(),
            discovered_at: Utc::now(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 3);
    }
}
