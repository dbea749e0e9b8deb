//! Delivery worker
//!
//! Handles one queue message: claims the file, re-derives its records and
//! POSTs them to the external API in file order. Every attempt is written to
//! `api_call_records` before the next one starts, which is what makes
//! redelivery safe: records that already succeeded are skipped and attempt
//! numbers continue where the last pass stopped.
//!
//! The claim is a lease keyed on the record's `updated_at`. It is renewed
//! around every POST; once another worker has re-claimed the file the renewal
//! fails and this pass stops without touching the file again.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::api_client::ApiClient;
use crate::cache::PayloadCache;
use crate::config::Config;
use crate::notifier::Notifier;
use crate::parser;
use crate::queue::QueueMessage;
use crate::store::{
    ApiCallRecord, FileRecord, FileStatus, NewApiCall, StatusStore, StatusUpdate, StoreError,
};
use crate::transfer::{self, FileDescriptor, TransferClient};

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The coordinator has not finished with the file; the queue should redeliver
    #[error("file {id} is {status}, not ready for delivery")]
    NotReady { id: Uuid, status: FileStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a single record's delivery pass ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum RecordOutcome {
    Delivered,
    /// Attempt budget spent; carries the accumulated failure detail
    Exhausted(String),
    /// Another worker holds the claim now
    Superseded,
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Attempts per record per delivery pass
    pub max_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n` times this
    pub backoff: Duration,
    /// Attempts when the payload has to be fetched again
    pub fetch_max_attempts: u32,
    pub fetch_backoff: Duration,
    /// A `Processing` record idle this long may be re-claimed
    pub stale_after: chrono::Duration,
}

impl DeliveryConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.api.max_attempts,
            backoff: config.api.backoff(),
            fetch_max_attempts: config.ingest.fetch_max_attempts,
            fetch_backoff: config.ingest.fetch_backoff(),
            stale_after: config.ingest.stale_after(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::config::DEFAULT_API_MAX_ATTEMPTS,
            backoff: Duration::from_millis(crate::config::DEFAULT_API_BACKOFF_MS),
            fetch_max_attempts: crate::config::DEFAULT_INGEST_FETCH_MAX_ATTEMPTS,
            fetch_backoff: Duration::from_millis(crate::config::DEFAULT_INGEST_FETCH_BACKOFF_MS),
            stale_after: chrono::Duration::seconds(
                crate::config::DEFAULT_INGEST_STALE_AFTER_SECS as i64,
            ),
        }
    }
}

pub struct DeliveryWorker {
    store: Arc<dyn StatusStore>,
    transfer: Arc<dyn TransferClient>,
    api: ApiClient,
    notifier: Arc<dyn Notifier>,
    cache: PayloadCache,
    config: DeliveryConfig,
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<dyn StatusStore>,
        transfer: Arc<dyn TransferClient>,
        api: ApiClient,
        notifier: Arc<dyn Notifier>,
        cache: PayloadCache,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            store,
            transfer,
            api,
            notifier,
            cache,
            config,
        }
    }

    /// Process one message. `Ok` means the message can be acknowledged.
    #[instrument(skip_all, fields(file_record_id = %message.file_record_id))]
    pub async fn handle(&self, message: QueueMessage) -> Result<(), DeliveryError> {
        let Some(file) = self.store.get_file(message.file_record_id).await? else {
            warn!(source_location = %message.source_location, "No file record for message, dropping");
            return Ok(());
        };

        match file.status {
            FileStatus::Processed | FileStatus::Failed => {
                info!(status = %file.status, "File already terminal, ignoring duplicate message");
                return Ok(());
            },
            FileStatus::Pending | FileStatus::Downloaded => {
                return Err(DeliveryError::NotReady {
                    id: file.id,
                    status: file.status,
                });
            },
            FileStatus::Queued | FileStatus::Processing => {},
        }

        let stale_before = Utc::now() - self.config.stale_after;
        let Some(file) = self.store.claim_for_delivery(file.id, stale_before).await? else {
            debug!("File claimed by another worker, ignoring duplicate message");
            return Ok(());
        };

        info!(filename = %file.filename, "Claimed file for delivery");
        self.deliver(file).await
    }

    async fn deliver(&self, file: FileRecord) -> Result<(), DeliveryError> {
        let data = match self.cache.get(file.id).await {
            Some(data) => data,
            None => {
                let descriptor = FileDescriptor::new(file.filename.clone(), file.source_location.clone());
                match transfer::fetch_with_retry(
                    self.transfer.as_ref(),
                    &descriptor,
                    self.config.fetch_max_attempts,
                    self.config.fetch_backoff,
                )
                .await
                {
                    Ok(data) => data,
                    Err(e) => {
                        let reason = format!("could not re-fetch file for delivery: {}", e);
                        return self.fail(&file, &reason).await;
                    },
                }
            },
        };

        let parsed = match parser::parse_file(&data) {
            Ok(parsed) => parsed,
            Err(e) => {
                let reason = format!("malformed file: {}", e);
                return self.fail(&file, &reason).await;
            },
        };

        let total = parsed.records.len();
        let mut lease = file.updated_at;
        let mut skipped = 0;

        for record in &parsed.records {
            let index = record.index as i32;

            // Re-read before every record: a superseded worker may have
            // recorded results since this pass started
            let (delivered, prior) = progress(&self.store.api_calls_for_file(file.id).await?, index);
            if delivered {
                debug!(record_index = index, "Record already delivered, skipping");
                skipped += 1;
                continue;
            }

            match self
                .deliver_record(&file, index, prior, record.to_payload(), &mut lease)
                .await?
            {
                RecordOutcome::Delivered => {},
                RecordOutcome::Exhausted(reason) => return self.fail(&file, &reason).await,
                RecordOutcome::Superseded => {
                    info!(record_index = index, "File re-claimed by another worker, abandoning this pass");
                    return Ok(());
                },
            }
        }

        if skipped > 0 {
            info!(skipped, total, "Resumed delivery");
        }

        let site_id = parsed
            .site_id()
            .map(str::to_string)
            .or_else(|| file.site_id.clone());
        match self
            .store
            .transition(
                file.id,
                FileStatus::Processing,
                FileStatus::Processed,
                StatusUpdate::default().with_site_id(site_id),
            )
            .await?
        {
            Some(_) => info!(records = total, "File processed"),
            None => warn!("File left Processing while delivering, not marking processed"),
        }

        self.cache.remove(file.id).await;
        Ok(())
    }

    /// POST one record until it succeeds or the attempt budget runs out.
    ///
    /// The lease is renewed before each POST and again once its result is
    /// recorded, so a POST is only sent while this worker holds the claim
    /// and every POST sent gets its audit row.
    async fn deliver_record(
        &self,
        file: &FileRecord,
        index: i32,
        prior_attempts: i32,
        payload: serde_json::Value,
        lease: &mut DateTime<Utc>,
    ) -> Result<RecordOutcome, DeliveryError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut errors = Vec::new();

        for pass_attempt in 1..=max_attempts {
            if !self.renew(file.id, lease).await {
                return Ok(RecordOutcome::Superseded);
            }

            let attempt = prior_attempts + pass_attempt as i32;
            let outcome = self.api.send(file, &payload).await;

            self.store
                .insert_api_call(NewApiCall {
                    file_record_id: file.id,
                    record_index: index,
                    attempt,
                    payload: payload.clone(),
                    response_status: outcome.status.map(i32::from),
                    response_body: outcome.body.clone(),
                    error_message: outcome.error.clone(),
                })
                .await?;

            if !self.renew(file.id, lease).await {
                return Ok(RecordOutcome::Superseded);
            }

            if outcome.is_success() {
                debug!(record_index = index, attempt, "Record delivered");
                return Ok(RecordOutcome::Delivered);
            }

            warn!(
                record_index = index,
                attempt,
                error = %outcome.describe(),
                "Record delivery failed"
            );
            errors.push(format!("attempt {}: {}", attempt, outcome.describe()));

            if pass_attempt < max_attempts {
                tokio::time::sleep(self.config.backoff * pass_attempt).await;
            }
        }

        Ok(RecordOutcome::Exhausted(format!(
            "record {} not delivered after {} attempts: {}",
            index,
            max_attempts,
            errors.join("; ")
        )))
    }

    /// Extend the claim. `false` once another worker holds it; a store error
    /// keeps the current lease and carries on.
    async fn renew(&self, id: Uuid, lease: &mut DateTime<Utc>) -> bool {
        match self.store.renew_claim(id, *lease).await {
            Ok(Some(renewed)) => {
                *lease = renewed;
                true
            },
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Failed to renew delivery claim");
                true
            },
        }
    }

    async fn fail(&self, file: &FileRecord, reason: &str) -> Result<(), DeliveryError> {
        match self
            .store
            .transition(
                file.id,
                FileStatus::Processing,
                FileStatus::Failed,
                StatusUpdate::error(reason),
            )
            .await?
        {
            Some(failed) => {
                error!(filename = %failed.filename, "Delivery failed: {}", reason);
                self.cache.remove(failed.id).await;
                self.notifier.notify(&failed, reason).await;
            },
            None => warn!("File left Processing before it could be failed"),
        }
        Ok(())
    }
}

/// Whether `index` already has a successful call, and the highest attempt
/// number recorded for it
fn progress(history: &[ApiCallRecord], index: i32) -> (bool, i32) {
    history
        .iter()
        .filter(|call| call.record_index == index)
        .fold((false, 0), |(delivered, prior), call| {
            (delivered || call.is_success(), prior.max(call.attempt))
        })
}
