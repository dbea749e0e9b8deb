//! Component wiring for the binary

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::api_client::ApiClient;
use crate::cache::PayloadCache;
use crate::config::{Config, DatabaseConfig};
use crate::coordinator::Coordinator;
use crate::notifier::{EmailNotifier, LogNotifier, Notifier};
use crate::queue::ApalisQueue;
use crate::store::{PgStatusStore, StatusStore};
use crate::transfer::{FtpTransferClient, TransferClient};
use crate::worker::{DeliveryConfig, DeliveryWorker};

/// Everything the subcommands share, built once from [`Config`]
pub struct App {
    pub pool: PgPool,
    pub store: Arc<dyn StatusStore>,
    pub queue: ApalisQueue,
    pub coordinator: Arc<Coordinator>,
    pub worker: Arc<DeliveryWorker>,
}

impl App {
    pub fn build(config: &Config, pool: PgPool) -> Result<Self> {
        let store: Arc<dyn StatusStore> = Arc::new(PgStatusStore::new(pool.clone()));
        let transfer: Arc<dyn TransferClient> =
            Arc::new(FtpTransferClient::new(config.ftp.clone()));
        let queue = ApalisQueue::new(&pool);

        let notifier: Arc<dyn Notifier> = match &config.email {
            Some(email) => Arc::new(
                EmailNotifier::new(email.clone(), store.clone())
                    .context("Failed to build SendGrid client")?,
            ),
            None => Arc::new(LogNotifier),
        };

        let cache = match &config.ingest.cache_dir {
            Some(dir) => {
                info!("Payload cache at {}", dir.display());
                PayloadCache::new(dir.clone())
            },
            None => PayloadCache::disabled(),
        };

        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            transfer.clone(),
            Arc::new(queue.clone()),
            notifier.clone(),
            cache.clone(),
            config.ingest.clone(),
        ));

        let api = ApiClient::new(&config.api).context("Failed to build API client")?;
        let worker = Arc::new(DeliveryWorker::new(
            store.clone(),
            transfer,
            api,
            notifier,
            cache,
            DeliveryConfig::from_config(config),
        ));

        Ok(Self {
            pool,
            store,
            queue,
            coordinator,
            worker,
        })
    }
}

/// Initialize the database connection pool
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await
        .context("Failed to connect to database")?;

    info!("Database connection pool established");
    Ok(pool)
}

/// Apply the relay schema and the apalis queue schema
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    apalis_postgres::PostgresStorage::setup(pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to set up job queue schema: {}", e))?;

    info!("Database migrations completed");
    Ok(())
}
