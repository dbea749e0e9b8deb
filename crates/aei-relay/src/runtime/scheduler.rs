//! Delivery worker pool
//!
//! Sets up the apalis monitor over the PostgreSQL-backed queue and hands every
//! message to the [`DeliveryWorker`].

use anyhow::Result;
use apalis::prelude::*;
use apalis_postgres::PostgresStorage;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::queue::QueueMessage;
use crate::worker::DeliveryWorker;

pub struct DeliveryScheduler {
    storage: PostgresStorage<QueueMessage>,
    worker: Arc<DeliveryWorker>,
    concurrency: usize,
    name: String,
}

impl DeliveryScheduler {
    pub fn new(
        storage: PostgresStorage<QueueMessage>,
        worker: Arc<DeliveryWorker>,
        concurrency: usize,
    ) -> Self {
        let host = hostname::get()
            .unwrap_or_else(|_| "unknown".into())
            .to_string_lossy()
            .to_string();
        Self {
            storage,
            worker,
            concurrency: concurrency.max(1),
            name: format!("aei-delivery@{}", host),
        }
    }

    /// Start `concurrency` apalis workers in a separate task
    pub fn start(self) -> Result<JoinHandle<()>> {
        info!(
            "Starting delivery worker pool '{}' with {} workers",
            self.name, self.concurrency
        );

        let handle = tokio::spawn(async move {
            let mut monitor = Monitor::new();
            for n in 0..self.concurrency {
                let storage = self.storage.clone();
                let worker = self.worker.clone();
                let name = format!("{}-{}", self.name, n);
                monitor = monitor.register(move |_index| {
                    let worker = worker.clone();
                    WorkerBuilder::new(name.clone())
                        .backend(storage.clone())
                        .build(move |message: QueueMessage| {
                            let worker = worker.clone();
                            async move { worker.handle(message).await }
                        })
                });
            }

            if let Err(e) = monitor.run().await {
                error!("Delivery worker pool error: {:?}", e);
            }
            info!("Delivery worker pool stopped");
        });

        Ok(handle)
    }
}
