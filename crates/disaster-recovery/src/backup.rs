//! Backup orchestration: the full and incremental pipelines
//!
//! One backup run is a linear sequence of blocking stages: health gate →
//! export → archive → upload → ledger anchor → catalog mirror → retention
//! sweep → notification. Each stage completes before the next starts; runs
//! are serialized by the external trigger. A run that fails after the
//! health gate appends a `failed` ledger event with its elapsed time before
//! the error propagates; a run that fails the health gate writes nothing,
//! so an empty backup is never anchored.

use crate::archive::ArchiveBuilder;
use crate::blob_client::{BlobClient, RetryPolicy};
use crate::catalog::BackupCatalog;
use crate::collection::{Collection, Datastore};
use crate::error::{RecoveryError, RecoveryResult};
use crate::exporter::SnapshotExporter;
use crate::ledger::LedgerAnchor;
use crate::notify::{BackupNotice, FailureNotice, Notifier, StorageUsage};
use crate::retention::{RetentionManager, RetentionPolicy};
use crate::types::{
    generate_backup_id, BackupMetadata, BackupRecord, BackupStatus, BackupType, LedgerEvent,
    LedgerEventType, StorageBlob,
};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Backup orchestrator configuration
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Upload attempt ceiling; re-uploading identical bytes is idempotent
    /// under content addressing, so retries happen at this layer rather
    /// than inside the blob client
    pub upload_max_attempts: u32,
    /// Download backoff schedule, shared with the sweep's unpin path
    pub retry: RetryPolicy,
    /// Retention windows enforced after every successful run
    pub retention: RetentionPolicy,
    /// Cumulative compressed-byte threshold that triggers a storage
    /// notification; None disables the check
    pub storage_threshold_bytes: Option<u64>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            upload_max_attempts: 3,
            retry: RetryPolicy::default(),
            retention: RetentionPolicy::default(),
            storage_threshold_bytes: None,
        }
    }
}

/// Outcome of an incremental run
#[derive(Debug, Clone)]
pub enum BackupOutcome {
    /// A backup was created and anchored
    Completed(BackupRecord),
    /// Nothing changed since the reference timestamp; no backup was stored
    /// and no ledger event was written
    Skipped,
}

/// Counters across the orchestrator's lifetime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupStats {
    /// Runs attempted, including skips
    pub total_runs: u64,
    /// Runs that anchored a backup
    pub successful_runs: u64,
    /// Runs that failed
    pub failed_runs: u64,
    /// Incremental runs skipped for having no changes
    pub skipped_runs: u64,
    /// Documents captured across successful runs
    pub total_documents: u64,
    /// Compressed bytes uploaded across successful runs
    pub total_compressed_bytes: u64,
    /// Mean compression ratio across successful runs, percent
    pub avg_compression_ratio_pct: f64,
}

/// Drives full and incremental backup runs end to end
pub struct BackupOrchestrator {
    datastore: Arc<dyn Datastore>,
    exporter: SnapshotExporter,
    archive: ArchiveBuilder,
    blob_client: Arc<dyn BlobClient>,
    ledger: Arc<dyn LedgerAnchor>,
    catalog: Arc<dyn BackupCatalog>,
    retention: RetentionManager,
    notifier: Arc<dyn Notifier>,
    config: BackupConfig,
    stats: Arc<RwLock<BackupStats>>,
}

impl BackupOrchestrator {
    /// Orchestrator over constructor-injected collaborators
    pub fn new(
        datastore: Arc<dyn Datastore>,
        collections: Vec<Arc<dyn Collection>>,
        blob_client: Arc<dyn BlobClient>,
        ledger: Arc<dyn LedgerAnchor>,
        catalog: Arc<dyn BackupCatalog>,
        notifier: Arc<dyn Notifier>,
        config: BackupConfig,
    ) -> Self {
        let retention = RetentionManager::new(
            Arc::clone(&catalog),
            Arc::clone(&ledger),
            Arc::clone(&blob_client),
            config.retention,
        );
        Self {
            datastore,
            exporter: SnapshotExporter::new(collections),
            archive: ArchiveBuilder::default(),
            blob_client,
            ledger,
            catalog,
            retention,
            notifier,
            config,
            stats: Arc::new(RwLock::new(BackupStats::default())),
        }
    }

    /// Run a full backup
    pub async fn run_full_backup(&self, triggered_by: &str) -> RecoveryResult<BackupRecord> {
        let started = Instant::now();
        let backup_id = generate_backup_id(BackupType::Full, Utc::now());
        info!(backup_id = %backup_id, triggered_by, "full backup started");
        self.stats.write().total_runs += 1;

        // Precondition gate: abort before any write so a sick datastore can
        // never produce an empty anchored backup
        if let Err(err) = self.datastore.health_check().await {
            self.stats.write().failed_runs += 1;
            let err = RecoveryError::HealthCheckFailed {
                reason: err.to_string(),
            };
            error!(backup_id = %backup_id, error = %err, "full backup aborted");
            return Err(err);
        }

        match self.execute_full(&backup_id, triggered_by).await {
            Ok(record) => {
                self.finish_success(&record, started).await;
                Ok(record)
            }
            Err(err) => {
                self.finish_failure("full_backup", &backup_id, &err, started)
                    .await;
                Err(err)
            }
        }
    }

    /// Run an incremental backup; [`BackupOutcome::Skipped`] when nothing
    /// changed since the last backup
    pub async fn run_incremental_backup(&self) -> RecoveryResult<BackupOutcome> {
        let started = Instant::now();
        self.stats.write().total_runs += 1;

        if let Err(err) = self.datastore.health_check().await {
            self.stats.write().failed_runs += 1;
            let err = RecoveryError::HealthCheckFailed {
                reason: err.to_string(),
            };
            error!(error = %err, "incremental backup aborted");
            return Err(err);
        }

        let active = self.catalog.list_active().await?;
        let parent = active
            .iter()
            .rev()
            .find(|record| record.backup_type == BackupType::Full)
            .cloned()
            .ok_or_else(|| RecoveryError::BackupFailed {
                reason: "no ACTIVE FULL backup to anchor an incremental on".to_string(),
            })?;
        // Changes are relative to the newest backup of either type
        let since = active
            .last()
            .map(|record| record.timestamp)
            .unwrap_or(parent.timestamp);

        let changeset = self.exporter.export_changes(since).await?;
        if changeset.is_empty() {
            let mut stats = self.stats.write();
            stats.skipped_runs += 1;
            info!(%since, "incremental backup skipped; no changes");
            return Ok(BackupOutcome::Skipped);
        }

        let backup_id = generate_backup_id(BackupType::Incremental, Utc::now());
        info!(
            backup_id = %backup_id,
            parent = %parent.backup_id,
            changes = changeset.total_changes(),
            "incremental backup started"
        );

        let outcome = async {
            self.append_started(&backup_id, "incremental_backup").await?;
            let (payload, metadata) = self.archive.build_incremental_archive(
                &changeset,
                &backup_id,
                &parent.backup_id,
                &parent.content_handle,
            )?;
            let blob = self.upload_with_retry(payload, &backup_id).await?;
            self.anchor_and_mirror(
                &backup_id,
                BackupType::Incremental,
                blob,
                Some(parent.backup_id.clone()),
                metadata,
            )
            .await
        }
        .await;

        match outcome {
            Ok(record) => {
                self.finish_success(&record, started).await;
                Ok(BackupOutcome::Completed(record))
            }
            Err(err) => {
                self.finish_failure("incremental_backup", &backup_id, &err, started)
                    .await;
                Err(err)
            }
        }
    }

    /// Newest backups first, up to `limit`
    pub async fn list_backups(&self, limit: usize) -> RecoveryResult<Vec<BackupRecord>> {
        self.catalog.list_newest(limit).await
    }

    /// Lifetime counters
    pub fn stats(&self) -> BackupStats {
        self.stats.read().clone()
    }

    async fn execute_full(&self, backup_id: &str, triggered_by: &str) -> RecoveryResult<BackupRecord> {
        self.append_started(backup_id, "full_backup").await?;
        debug!(backup_id, triggered_by, "exporting collections");

        let export = self.exporter.export_full().await?;
        let (payload, metadata) = self.archive.build_full_archive(&export)?;
        let blob = self.upload_with_retry(payload, backup_id).await?;
        self.anchor_and_mirror(backup_id, BackupType::Full, blob, None, metadata)
            .await
    }

    async fn append_started(&self, backup_id: &str, operation: &str) -> RecoveryResult<()> {
        let event = LedgerEvent::new(
            LedgerEventType::Started,
            backup_id,
            "IN_PROGRESS",
            serde_json::json!({ "operation": operation }),
            0,
        );
        self.ledger.append_event(&event).await?;
        Ok(())
    }

    async fn upload_with_retry(
        &self,
        payload: Vec<u8>,
        backup_id: &str,
    ) -> RecoveryResult<StorageBlob> {
        let name = format!("{backup_id}.json.gz");
        let tags = HashMap::from([("backupId".to_string(), backup_id.to_string())]);
        let mut last_error = String::new();

        for attempt in 1..=self.config.upload_max_attempts {
            match self.blob_client.put(payload.clone(), &name, &tags).await {
                Ok(blob) => {
                    debug!(backup_id, content_handle = %blob.content_handle, attempt, "payload uploaded");
                    return Ok(blob);
                }
                Err(err) => {
                    last_error = err.to_string();
                    warn!(backup_id, attempt, error = %last_error, "upload attempt failed");
                    if attempt < self.config.upload_max_attempts {
                        tokio::time::sleep(self.config.retry.delay_after(attempt)).await;
                    }
                }
            }
        }
        Err(RecoveryError::StorageError {
            details: format!(
                "upload failed after {} attempts: {last_error}",
                self.config.upload_max_attempts
            ),
        })
    }

    /// Anchor the canonical record on the ledger, then mirror it into the
    /// catalog. The record is durable once anchored; a mirror failure is
    /// advisory because the catalog is rebuildable from the ledger.
    async fn anchor_and_mirror(
        &self,
        backup_id: &str,
        backup_type: BackupType,
        blob: StorageBlob,
        parent_backup_id: Option<String>,
        metadata: BackupMetadata,
    ) -> RecoveryResult<BackupRecord> {
        let mut record = BackupRecord {
            backup_id: backup_id.to_string(),
            backup_type,
            content_handle: blob.content_handle,
            ledger_tx_ref: String::new(),
            timestamp: Utc::now(),
            parent_backup_id,
            metadata,
            status: BackupStatus::Active,
        };

        let event = LedgerEvent::new(
            LedgerEventType::Completed,
            backup_id,
            "ACTIVE",
            serde_json::to_value(&record)?,
            0,
        );
        record.ledger_tx_ref = self.ledger.append_event(&event).await?;

        if let Err(err) = self.catalog.upsert(record.clone()).await {
            warn!(
                backup_id,
                error = %err,
                "catalog mirror failed; record is anchored and a rebuild will restore it"
            );
        }
        Ok(record)
    }

    async fn finish_success(&self, record: &BackupRecord, started: Instant) {
        let elapsed = started.elapsed().as_millis() as u64;
        {
            let mut stats = self.stats.write();
            stats.successful_runs += 1;
            stats.total_documents += record.metadata.total_documents;
            stats.total_compressed_bytes += record.metadata.compressed_bytes;
            let n = stats.successful_runs as f64;
            stats.avg_compression_ratio_pct = (stats.avg_compression_ratio_pct * (n - 1.0)
                + record.metadata.compression_ratio_pct)
                / n;
        }

        if let Err(err) = self.retention.sweep().await {
            warn!(error = %err, "post-backup retention sweep failed; ignoring");
        }
        self.check_storage_threshold().await;

        let notice = BackupNotice {
            backup_id: record.backup_id.clone(),
            backup_type: record.backup_type,
            total_documents: record.metadata.total_documents,
            compressed_bytes: record.metadata.compressed_bytes,
            execution_time_ms: elapsed,
        };
        if let Err(err) = self.notifier.on_backup_succeeded(&notice).await {
            warn!(error = %err, "backup notification failed; ignoring");
        }

        info!(
            backup_id = %record.backup_id,
            backup_type = ?record.backup_type,
            documents = record.metadata.total_documents,
            compressed_bytes = record.metadata.compressed_bytes,
            execution_time_ms = elapsed,
            "backup complete"
        );
    }

    async fn finish_failure(
        &self,
        operation: &str,
        backup_id: &str,
        err: &RecoveryError,
        started: Instant,
    ) {
        let elapsed = started.elapsed().as_millis() as u64;
        self.stats.write().failed_runs += 1;
        error!(backup_id, operation, error = %err, "backup failed");

        let event = LedgerEvent::new(
            LedgerEventType::Failed,
            backup_id,
            "FAILED",
            serde_json::json!({ "operation": operation, "error": err.to_string() }),
            elapsed,
        );
        if let Err(append_err) = self.ledger.append_event(&event).await {
            warn!(backup_id, error = %append_err, "failed-event append failed; continuing");
        }

        let notice = FailureNotice {
            operation: operation.to_string(),
            backup_id: Some(backup_id.to_string()),
            error: err.to_string(),
            execution_time_ms: elapsed,
        };
        if let Err(notify_err) = self.notifier.on_backup_failed(&notice).await {
            warn!(error = %notify_err, "failure notification failed; ignoring");
        }
    }

    async fn check_storage_threshold(&self) {
        let Some(threshold) = self.config.storage_threshold_bytes else {
            return;
        };
        let active = match self.catalog.list_active().await {
            Ok(active) => active,
            Err(err) => {
                warn!(error = %err, "storage threshold check skipped; catalog unavailable");
                return;
            }
        };
        let total: u64 = active
            .iter()
            .map(|record| record.metadata.compressed_bytes)
            .sum();
        if total > threshold {
            let usage = StorageUsage {
                total_compressed_bytes: total,
                threshold_bytes: threshold,
            };
            warn!(total, threshold, "backup storage threshold exceeded");
            if let Err(err) = self.notifier.on_storage_threshold_exceeded(&usage).await {
                warn!(error = %err, "storage threshold notification failed; ignoring");
            }
        }
    }
}
