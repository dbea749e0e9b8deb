//! Ingestion coordinator
//!
//! [`Coordinator::run_once`] is the scheduled entry point. It keeps no state
//! between runs: everything it needs is re-read from the status store, so a
//! run that dies half way is picked up by the next one.
//!
//! Order of work in a run:
//!
//! 1. Recovery of records left behind by earlier runs (`Pending`,
//!    `Downloaded`, and `Queued`/`Processing` records that went quiet)
//! 2. Discovery of new files on the transfer endpoint, at most
//!    `max_files_per_run` of them
//! 3. Per new file: fetch, parse, enqueue, archive
//! 4. One digest notification if anything failed
//!
//! Each file is handled on its own; a failure is written to that file's
//! record and the run moves on. Records that keep being deferred are failed
//! once they are older than the configured age limits, so nothing stays in a
//! non-terminal status forever.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::PayloadCache;
use crate::config::IngestConfig;
use crate::notifier::Notifier;
use crate::parser::{self, FileName};
use crate::queue::{MessageQueue, QueueError, QueueMessage};
use crate::store::{
    Discovery, FileRecord, FileStatus, NewFileRecord, StatusStore, StatusUpdate, StoreResult,
};
use crate::transfer::{self, Cursor, FileDescriptor, TransferClient, TransferError};

/// Counts reported at the end of every run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// New files inserted as `Pending`
    pub discovered: usize,
    /// Listed files that were already tracked
    pub duplicates: usize,
    /// Files moved to `Queued`
    pub queued: usize,
    /// Files moved to `Failed`
    pub failed: usize,
    /// Files left where they were after a transient failure
    pub deferred: usize,
    /// Records from earlier runs that made progress
    pub recovered: usize,
    /// Listed files left for a later run by the per-run cap
    pub postponed: usize,
    /// Records this run moved to `Failed`
    #[serde(skip)]
    pub failures: Vec<FileRecord>,
}

/// Where a single file ended up after this run touched it
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Queued,
    Failed(Box<FileRecord>),
    Deferred,
    /// A stale record was put back on the queue
    Requeued,
    /// Another actor moved the record first
    Skipped,
}

impl RunSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Queued => self.queued += 1,
            Outcome::Failed(record) => {
                self.failed += 1;
                self.failures.push(*record);
            },
            Outcome::Deferred => self.deferred += 1,
            Outcome::Requeued | Outcome::Skipped => {},
        }
    }
}

pub struct Coordinator {
    store: Arc<dyn StatusStore>,
    transfer: Arc<dyn TransferClient>,
    queue: Arc<dyn MessageQueue>,
    notifier: Arc<dyn Notifier>,
    cache: PayloadCache,
    config: IngestConfig,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn StatusStore>,
        transfer: Arc<dyn TransferClient>,
        queue: Arc<dyn MessageQueue>,
        notifier: Arc<dyn Notifier>,
        cache: PayloadCache,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            transfer,
            queue,
            notifier,
            cache,
            config,
        }
    }

    /// One full ingestion pass
    #[instrument(skip_all)]
    pub async fn run_once(&self) -> RunSummary {
        let mut summary = RunSummary::default();

        self.recover(&mut summary).await;
        self.discover(&mut summary).await;

        info!(
            discovered = summary.discovered,
            duplicates = summary.duplicates,
            queued = summary.queued,
            failed = summary.failed,
            deferred = summary.deferred,
            recovered = summary.recovered,
            postponed = summary.postponed,
            "Ingestion run complete"
        );

        if !summary.failures.is_empty() {
            self.notifier.notify_batch(&summary.failures).await;
        }

        summary
    }

    // ------------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------------

    async fn recover(&self, summary: &mut RunSummary) {
        let now = Utc::now();

        match self.store.files_in_status(FileStatus::Pending, None).await {
            Ok(records) => {
                let cutoff = now - self.config.pending_max_age();
                for record in records {
                    let outcome = if record.created_at < cutoff {
                        let reason = format!(
                            "not downloaded within {}s of discovery{}",
                            self.config.pending_max_age_secs,
                            last_error(&record)
                        );
                        self.fail(&record, FileStatus::Pending, &reason).await
                    } else {
                        let descriptor = descriptor_for(&record);
                        self.process_pending(record, &descriptor).await
                    };
                    self.tally_recovery(summary, outcome);
                }
            },
            Err(e) => error!(error = %e, "Failed to load pending records"),
        }

        match self.store.files_in_status(FileStatus::Downloaded, None).await {
            Ok(records) => {
                let cutoff = now - self.config.pending_max_age();
                for record in records {
                    let outcome = if record.created_at < cutoff {
                        let reason = format!(
                            "not queued within {}s of discovery{}",
                            self.config.pending_max_age_secs,
                            last_error(&record)
                        );
                        self.fail(&record, FileStatus::Downloaded, &reason).await
                    } else {
                        self.recover_downloaded(record).await
                    };
                    self.tally_recovery(summary, outcome);
                }
            },
            Err(e) => error!(error = %e, "Failed to load downloaded records"),
        }

        let stale_before = now - self.config.stale_after();
        let expired_before = now - self.config.delivery_max_age();
        for status in [FileStatus::Queued, FileStatus::Processing] {
            match self.store.files_in_status(status, Some(stale_before)).await {
                Ok(records) => {
                    for record in records {
                        let outcome = if record.created_at < expired_before {
                            let reason = format!(
                                "not delivered within {}s of discovery (stuck in {})",
                                self.config.delivery_max_age_secs, status
                            );
                            self.fail(&record, status, &reason).await
                        } else {
                            Ok(self.requeue(&record).await)
                        };
                        self.tally_recovery(summary, outcome);
                    }
                },
                Err(e) => error!(error = %e, status = %status, "Failed to load stale records"),
            }
        }
    }

    fn tally_recovery(&self, summary: &mut RunSummary, outcome: StoreResult<Outcome>) {
        match outcome {
            Ok(outcome) => {
                if matches!(outcome, Outcome::Queued | Outcome::Failed(_) | Outcome::Requeued) {
                    summary.recovered += 1;
                }
                summary.record(outcome);
            },
            Err(e) => {
                error!(error = %e, "Status store error during recovery");
                summary.deferred += 1;
            },
        }
    }

    #[instrument(skip_all, fields(file_record_id = %record.id, filename = %record.filename))]
    async fn recover_downloaded(&self, record: FileRecord) -> StoreResult<Outcome> {
        let descriptor = descriptor_for(&record);

        let data = match self.cache.get(record.id).await {
            Some(data) => data,
            None => match self.fetch_with_retry(&descriptor).await {
                Ok(data) => data,
                Err(TransferError::NotFound(path)) => {
                    let reason = format!("source file disappeared before it was queued: {}", path);
                    return self.fail(&record, FileStatus::Downloaded, &reason).await;
                },
                Err(e) => {
                    self.store.record_error(record.id, &e.to_string()).await?;
                    return Ok(Outcome::Deferred);
                },
            },
        };

        self.process_downloaded(record, &descriptor, &data).await
    }

    /// Re-enqueue a `Queued` or `Processing` record that has not moved for a while.
    ///
    /// Reported as `Queued` on success; the record's status itself is left alone.
    #[instrument(skip_all, fields(file_record_id = %record.id, filename = %record.filename, status = %record.status))]
    async fn requeue(&self, record: &FileRecord) -> Outcome {
        if let Err(e) = self.enqueue_with_retry(record).await {
            warn!(error = %e, "Failed to re-enqueue stale record");
            return Outcome::Deferred;
        }

        // A `Processing` record stays stale so a worker may re-claim it
        if record.status == FileStatus::Queued {
            if let Err(e) = self.store.heartbeat(record.id).await {
                warn!(error = %e, "Failed to refresh re-enqueued record");
            }
        }

        info!("Re-enqueued stale record");
        Outcome::Requeued
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    async fn discover(&self, summary: &mut RunSummary) {
        let cursor = match self.config.lookback_hours {
            Some(hours) => Cursor::since(Utc::now() - chrono::Duration::hours(hours as i64)),
            None => Cursor::all(),
        };

        let files = match self.transfer.list_new_files(&cursor).await {
            Ok(files) => files,
            Err(e) => {
                error!(error = %e, "Failed to list files on transfer endpoint");
                return;
            },
        };

        let listed = files.len();
        for (position, descriptor) in files.into_iter().enumerate() {
            if summary.discovered >= self.config.max_files_per_run {
                summary.postponed = listed - position;
                warn!(
                    limit = self.config.max_files_per_run,
                    postponed = summary.postponed,
                    "Per-run file limit reached, leaving the rest for the next run"
                );
                break;
            }

            let new = NewFileRecord {
                filename: descriptor.filename.clone(),
                source_location: descriptor.location.clone(),
                site_id: FileName::parse(&descriptor.filename).map(|name| name.site_id),
            };

            let discovery = match self.store.insert_discovered(new).await {
                Ok(discovery) => discovery,
                Err(e) => {
                    error!(filename = %descriptor.filename, error = %e, "Failed to record discovered file");
                    summary.deferred += 1;
                    continue;
                },
            };

            match discovery {
                Discovery::Created(record) => {
                    summary.discovered += 1;
                    info!(file_record_id = %record.id, filename = %record.filename, "Discovered new file");
                    match self.process_pending(record, &descriptor).await {
                        Ok(outcome) => summary.record(outcome),
                        Err(e) => {
                            error!(filename = %descriptor.filename, error = %e, "Status store error");
                            summary.deferred += 1;
                        },
                    }
                },
                Discovery::Existing(record) => {
                    summary.duplicates += 1;
                    debug!(file_record_id = %record.id, status = %record.status, "File already tracked");
                    // Queued earlier but the archive step never completed
                    if record.status >= FileStatus::Queued {
                        self.consume(&descriptor).await;
                    }
                },
            }
        }
    }

    // ------------------------------------------------------------------------
    // Per-file steps
    // ------------------------------------------------------------------------

    /// `Pending` -> fetch -> `Downloaded` -> parse -> enqueue -> `Queued`
    #[instrument(skip_all, fields(file_record_id = %record.id, filename = %record.filename))]
    async fn process_pending(
        &self,
        record: FileRecord,
        descriptor: &FileDescriptor,
    ) -> StoreResult<Outcome> {
        let data = match self.fetch_with_retry(descriptor).await {
            Ok(data) => data,
            Err(TransferError::NotFound(path)) => {
                let reason = format!("file not found on transfer endpoint: {}", path);
                return self.fail(&record, FileStatus::Pending, &reason).await;
            },
            Err(e) => {
                warn!(error = %e, "Fetch failed, leaving file pending");
                self.store.record_error(record.id, &e.to_string()).await?;
                return Ok(Outcome::Deferred);
            },
        };

        let Some(record) = self
            .store
            .transition(
                record.id,
                FileStatus::Pending,
                FileStatus::Downloaded,
                StatusUpdate::default(),
            )
            .await?
        else {
            debug!("Record moved by another run, skipping");
            return Ok(Outcome::Skipped);
        };

        debug!(bytes = data.len(), "Downloaded");
        self.cache.put(record.id, &data).await;

        self.process_downloaded(record, descriptor, &data).await
    }

    /// `Downloaded` -> parse -> enqueue -> `Queued` -> archive
    async fn process_downloaded(
        &self,
        record: FileRecord,
        descriptor: &FileDescriptor,
        data: &[u8],
    ) -> StoreResult<Outcome> {
        let parsed = match parser::parse_file(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                let reason = format!("malformed file: {}", e);
                return self.fail(&record, FileStatus::Downloaded, &reason).await;
            },
        };

        let site_id = parsed
            .site_id()
            .map(str::to_string)
            .or_else(|| record.site_id.clone());

        if let Err(e) = self.enqueue_with_retry(&record).await {
            warn!(error = %e, "Enqueue failed, leaving file downloaded");
            self.store.record_error(record.id, &e.to_string()).await?;
            return Ok(Outcome::Deferred);
        }

        let queued = self
            .store
            .transition(
                record.id,
                FileStatus::Downloaded,
                FileStatus::Queued,
                StatusUpdate::default().with_site_id(site_id),
            )
            .await?;

        if queued.is_none() {
            debug!("Record moved by another actor after enqueue");
            return Ok(Outcome::Skipped);
        }

        info!(records = parsed.records.len(), "Queued for delivery");
        self.consume(descriptor).await;

        Ok(Outcome::Queued)
    }

    async fn fetch_with_retry(&self, descriptor: &FileDescriptor) -> Result<Vec<u8>, TransferError> {
        transfer::fetch_with_retry(
            self.transfer.as_ref(),
            descriptor,
            self.config.fetch_max_attempts,
            self.config.fetch_backoff(),
        )
        .await
    }

    /// Enqueue with the same attempt budget and backoff as fetches
    async fn enqueue_with_retry(&self, record: &FileRecord) -> Result<(), QueueError> {
        let max_attempts = self.config.fetch_max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.queue.enqueue(QueueMessage::for_file(record)).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_attempts => {
                    warn!(attempt, max_attempts, error = %e, "Enqueue failed, retrying");
                    tokio::time::sleep(self.config.fetch_backoff() * attempt).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Archive on the endpoint; failures are retried on the next run
    async fn consume(&self, descriptor: &FileDescriptor) {
        match self.transfer.mark_consumed(descriptor).await {
            Ok(()) => debug!(filename = %descriptor.filename, "Marked consumed"),
            Err(TransferError::NotFound(_)) => {
                debug!(filename = %descriptor.filename, "Already consumed")
            },
            Err(e) => {
                warn!(filename = %descriptor.filename, error = %e, "Failed to mark file consumed")
            },
        }
    }

    async fn fail(&self, record: &FileRecord, from: FileStatus, reason: &str) -> StoreResult<Outcome> {
        match self
            .store
            .transition(record.id, from, FileStatus::Failed, StatusUpdate::error(reason))
            .await?
        {
            Some(failed) => {
                error!(file_record_id = %failed.id, filename = %failed.filename, "File failed: {}", reason);
                self.cache.remove(failed.id).await;
                self.notifier.notify(&failed, reason).await;
                Ok(Outcome::Failed(Box::new(failed)))
            },
            None => Ok(Outcome::Skipped),
        }
    }
}

/// `" (last error: ...)"` suffix for failure reasons, empty without one
fn last_error(record: &FileRecord) -> String {
    record
        .error_message
        .as_deref()
        .map(|e| format!(" (last error: {})", e))
        .unwrap_or_default()
}

/// Rebuild a descriptor from a stored record
fn descriptor_for(record: &FileRecord) -> FileDescriptor {
    FileDescriptor::new(record.filename.clone(), record.source_location.clone())
}
