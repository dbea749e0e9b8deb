//! Shared fixtures for AEI relay integration tests
//!
//! - [`Pipeline`]: coordinator and delivery worker wired to in-memory
//!   transfer, queue and store, with the external API on a wiremock server
//! - [`RecordingNotifier`]: captures notifications for assertions
//! - [`TestPostgres`]: PostgreSQL container with migrations applied

#![allow(dead_code)]

use aei_relay::api_client::ApiClient;
use aei_relay::cache::PayloadCache;
use aei_relay::config::{ApiConfig, IngestConfig};
use aei_relay::notifier::Notifier;
use aei_relay::queue::MemoryQueue;
use aei_relay::store::{FileRecord, MemoryStatusStore};
use aei_relay::transfer::MemoryTransferClient;
use aei_relay::worker::{DeliveryConfig, DeliveryWorker};
use aei_relay::Coordinator;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use wiremock::MockServer;

// ============================================================================
// File Fixtures
// ============================================================================

pub const FILENAME: &str = "202109150646-0001-IHT0001_0022.csv";

pub const AEM: &str =
    "AEM*IHTRR*IHT0001*210915*0646*0700*060*Y*411*0022*G*G*N*0*E*004*000*003*C*N*F*N*01666*H*01*01*025*025*0106";
pub const RRE1: &str = "RRE*001*D*UP  *0000003237*A* *S*G*A*99*99*002*05*01";
pub const RRE2: &str = "RRE*002*D*BNSF*0000512210*B* *S*G*A*99*98*002*04*01";
pub const EOT: &str = "EOT*026*E*UPRQ*0000067046*99*00*K";
pub const EOC: &str = "EOC*0000001521";

/// Header followed by two railcars and an end-of-train device: three records
pub fn three_record_file() -> String {
    [AEM, RRE1, RRE2, EOT, EOC].join("\r\n") + "\r\n"
}

pub fn header_only_file() -> String {
    format!("{}\n", AEM)
}

// ============================================================================
// Notifier
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(FileRecord, String)>>,
    batches: Mutex<Vec<Vec<FileRecord>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(FileRecord, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn batches(&self) -> Vec<Vec<FileRecord>> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, file: &FileRecord, reason: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((file.clone(), reason.to_string()));
        }
    }

    async fn notify_batch(&self, failures: &[FileRecord]) {
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(failures.to_vec());
        }
    }
}

// ============================================================================
// Pipeline Harness
// ============================================================================

pub struct Pipeline {
    pub store: Arc<MemoryStatusStore>,
    pub transfer: Arc<MemoryTransferClient>,
    pub queue: Arc<MemoryQueue>,
    pub notifier: Arc<RecordingNotifier>,
    pub api: MockServer,
    pub coordinator: Coordinator,
    pub worker: DeliveryWorker,
    client: ApiClient,
    cache: PayloadCache,
}

impl Pipeline {
    pub async fn start() -> Self {
        Self::start_with(PayloadCache::disabled(), IngestConfig::default()).await
    }

    pub async fn start_with(cache: PayloadCache, ingest: IngestConfig) -> Self {
        let store = Arc::new(MemoryStatusStore::new());
        let transfer = Arc::new(MemoryTransferClient::new("reader.example.com"));
        let queue = Arc::new(MemoryQueue::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let api = MockServer::start().await;

        let ingest = IngestConfig {
            fetch_backoff_ms: 1,
            ..ingest
        };

        let coordinator = Coordinator::new(
            store.clone(),
            transfer.clone(),
            queue.clone(),
            notifier.clone(),
            cache.clone(),
            ingest,
        );

        let mut api_config = ApiConfig::new(format!("{}/aei", api.uri()));
        api_config.timeout_secs = 2;
        let client = ApiClient::new(&api_config).unwrap();

        let worker = DeliveryWorker::new(
            store.clone(),
            transfer.clone(),
            client.clone(),
            notifier.clone(),
            cache.clone(),
            Self::delivery_config(),
        );

        Self {
            store,
            transfer,
            queue,
            notifier,
            api,
            coordinator,
            worker,
            client,
            cache,
        }
    }

    /// Worker settings used by [`Pipeline::worker`]
    pub fn delivery_config() -> DeliveryConfig {
        DeliveryConfig {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
            fetch_backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    /// Another worker sharing this pipeline's store, transfer and API
    pub fn worker_with(&self, config: DeliveryConfig) -> DeliveryWorker {
        DeliveryWorker::new(
            self.store.clone(),
            self.transfer.clone(),
            self.client.clone(),
            self.notifier.clone(),
            self.cache.clone(),
            config,
        )
    }

    /// Hand every queued message to the worker, in order
    pub async fn deliver_all(&self) -> usize {
        let messages = self.queue.drain();
        let count = messages.len();
        for message in messages {
            self.worker.handle(message).await.unwrap();
        }
        count
    }

    pub fn only_file(&self) -> FileRecord {
        let files = self.store.all_files();
        assert_eq!(files.len(), 1, "expected exactly one file record");
        files[0].clone()
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    /// Start a PostgreSQL container with the relay migrations applied
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
