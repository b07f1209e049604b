//! Restore orchestration: chain resolution, ordered application, verification
//!
//! A restore resolves the minimal chain `[FULL, INCREMENTAL...]` needed to
//! reach the target backup, applies each entry in timestamp order and
//! verifies live document counts against the FULL record. Application is
//! deliberately not transactional across the chain: a failed entry aborts
//! the remainder but already-applied entries stay applied, surfaced through
//! the failure report and ledger trail.

use crate::archive::ArchiveBuilder;
use crate::blob_client::{download_with_retry, BlobClient, RetryPolicy};
use crate::catalog::BackupCatalog;
use crate::collection::Collection;
use crate::error::{RecoveryError, RecoveryResult};
use crate::ledger::LedgerAnchor;
use crate::notify::{FailureNotice, Notifier, RestoreNotice};
use crate::types::{BackupRecord, BackupType, LedgerEvent, LedgerEventType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Transitive parent lookups allowed before a chain is declared cyclic
const MAX_CHAIN_DEPTH: usize = 32;

/// Restore options
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Skip the drop-and-recreate of target collections before applying the
    /// FULL entry; existing documents are left in place
    pub safe_mode: bool,
}

/// Post-restore count comparison for one collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionVerification {
    /// Collection name
    pub collection: String,
    /// Count recorded by the FULL backup
    pub expected: u64,
    /// Live count after application
    pub actual: u64,
    /// `actual - expected`; non-zero is reported, never auto-corrected
    pub difference: i64,
}

impl CollectionVerification {
    /// True when live and recorded counts match
    pub fn matches(&self) -> bool {
        self.difference == 0
    }
}

/// Outcome of a restore or recovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorationReport {
    /// Target backup id
    pub target_backup_id: String,
    /// Resolved chain, FULL first
    pub chain: Vec<String>,
    /// Chain entries actually applied, in order
    pub applied: Vec<String>,
    /// Whether safe mode was requested
    pub safe_mode: bool,
    /// Per-collection count verification against the FULL record
    pub verification: Vec<CollectionVerification>,
    /// Run duration
    pub execution_time_ms: u64,
    /// Completion instant
    pub completed_at: DateTime<Utc>,
}

impl RestorationReport {
    /// Collections whose live count differs from the recorded count
    pub fn mismatches(&self) -> usize {
        self.verification.iter().filter(|v| !v.matches()).count()
    }
}

/// Resolves restoration chains and applies them to the primary datastore
pub struct RestoreOrchestrator {
    collections: Vec<Arc<dyn Collection>>,
    blob_client: Arc<dyn BlobClient>,
    ledger: Arc<dyn LedgerAnchor>,
    catalog: Arc<dyn BackupCatalog>,
    notifier: Arc<dyn Notifier>,
    archive: ArchiveBuilder,
    retry: RetryPolicy,
}

impl RestoreOrchestrator {
    /// Orchestrator over constructor-injected collaborators
    pub fn new(
        collections: Vec<Arc<dyn Collection>>,
        blob_client: Arc<dyn BlobClient>,
        ledger: Arc<dyn LedgerAnchor>,
        catalog: Arc<dyn BackupCatalog>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            collections,
            blob_client,
            ledger,
            catalog,
            notifier,
            archive: ArchiveBuilder::default(),
            retry,
        }
    }

    /// Restore the datastore to the state captured by `backup_id`
    pub async fn restore_to_backup(
        &self,
        backup_id: &str,
        options: RestoreOptions,
    ) -> RecoveryResult<RestorationReport> {
        let started = Instant::now();
        info!(backup_id, safe_mode = options.safe_mode, "restore started");

        self.append_event_best_effort(LedgerEvent::new(
            LedgerEventType::Started,
            backup_id,
            "RESTORING",
            serde_json::json!({ "operation": "restore", "safeMode": options.safe_mode }),
            0,
        ))
        .await;

        let chain = match self.resolve_chain(backup_id).await {
            Ok(chain) => chain,
            Err(err) => {
                self.fail(backup_id, &err, started, &[]).await;
                return Err(err);
            }
        };
        let chain_ids: Vec<String> = chain.iter().map(|r| r.backup_id.clone()).collect();
        debug!(backup_id, chain = ?chain_ids, "restoration chain resolved");

        let mut applied: Vec<String> = Vec::new();
        for record in &chain {
            let outcome = match record.backup_type {
                BackupType::Full => {
                    apply_full_record(
                        &self.collections,
                        self.blob_client.as_ref(),
                        &self.archive,
                        &self.retry,
                        record,
                        options.safe_mode,
                    )
                    .await
                }
                BackupType::Incremental => {
                    apply_incremental_record(
                        &self.collections,
                        self.blob_client.as_ref(),
                        &self.archive,
                        &self.retry,
                        record,
                    )
                    .await
                }
            };
            if let Err(err) = outcome {
                // Already-applied entries are retained as-is; the datastore
                // is in a partially-applied state the report trail records
                self.fail(backup_id, &err, started, &applied).await;
                return Err(err);
            }
            applied.push(record.backup_id.clone());
        }

        if let Err(err) = rebuild_indexes(&self.collections).await {
            self.fail(backup_id, &err, started, &applied).await;
            return Err(err);
        }

        let verification = match verify_counts(&self.collections, &chain[0]).await {
            Ok(verification) => verification,
            Err(err) => {
                self.fail(backup_id, &err, started, &applied).await;
                return Err(err);
            }
        };

        let report = RestorationReport {
            target_backup_id: backup_id.to_string(),
            chain: chain_ids,
            applied,
            safe_mode: options.safe_mode,
            verification,
            execution_time_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        };

        self.append_event_best_effort(LedgerEvent::new(
            LedgerEventType::Completed,
            backup_id,
            "RESTORED",
            serde_json::json!({
                "operation": "restore",
                "applied": report.applied,
                "mismatches": report.mismatches(),
            }),
            report.execution_time_ms,
        ))
        .await;

        let notice = RestoreNotice {
            backup_id: backup_id.to_string(),
            chain_length: report.applied.len(),
            mismatched_collections: report.mismatches(),
            execution_time_ms: report.execution_time_ms,
        };
        if let Err(err) = self.notifier.on_restore_succeeded(&notice).await {
            warn!(error = %err, "restore notification failed; ignoring");
        }

        info!(
            backup_id,
            chain_length = report.applied.len(),
            mismatches = report.mismatches(),
            execution_time_ms = report.execution_time_ms,
            "restore complete"
        );
        Ok(report)
    }

    /// Resolve the chain for a target backup
    ///
    /// Catalog first; the ledger is consulted only when the catalog itself
    /// errors. A FULL target resolves to a single-element chain; an
    /// INCREMENTAL target resolves to its FULL ancestor plus every ACTIVE
    /// INCREMENTAL between the ancestor and the target, inclusive, strictly
    /// time-ordered.
    pub async fn resolve_chain(&self, backup_id: &str) -> RecoveryResult<Vec<BackupRecord>> {
        let (target, catalog_available) = self.lookup(backup_id).await?;

        if target.backup_type == BackupType::Full {
            return Ok(vec![target]);
        }

        // Walk parents until the FULL ancestor; chains are expected to be
        // one hop but historical records may nest
        let mut ancestor = target.clone();
        let mut depth = 0usize;
        while ancestor.backup_type != BackupType::Full {
            depth += 1;
            if depth > MAX_CHAIN_DEPTH {
                return Err(RecoveryError::IntegrityFailure {
                    details: format!("chain for {backup_id} exceeds depth {MAX_CHAIN_DEPTH}"),
                });
            }
            let parent_id = ancestor.parent_backup_id.clone().ok_or_else(|| {
                RecoveryError::ChainBroken {
                    backup_id: ancestor.backup_id.clone(),
                    missing_parent: "<none recorded>".to_string(),
                }
            })?;
            let (parent, _) =
                self.lookup(&parent_id)
                    .await
                    .map_err(|_| RecoveryError::ChainBroken {
                        backup_id: ancestor.backup_id.clone(),
                        missing_parent: parent_id.clone(),
                    })?;
            ancestor = parent;
        }

        let mut links = if catalog_available {
            self.catalog
                .list_active()
                .await?
                .into_iter()
                .filter(|record| {
                    record.backup_type == BackupType::Incremental
                        && record.parent_backup_id.as_deref() == Some(ancestor.backup_id.as_str())
                        && record.timestamp > ancestor.timestamp
                        && record.timestamp <= target.timestamp
                })
                .collect::<Vec<_>>()
        } else {
            self.ledger
                .query_chain(&ancestor.backup_id, target.timestamp)
                .await?
        };
        if !links.iter().any(|record| record.backup_id == target.backup_id) {
            links.push(target.clone());
        }
        links.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let mut chain = Vec::with_capacity(links.len() + 1);
        chain.push(ancestor);
        chain.extend(links);
        Ok(chain)
    }

    /// Look a record up in the catalog, falling back to the ledger only
    /// when the catalog errors; returns whether the catalog was usable
    async fn lookup(&self, backup_id: &str) -> RecoveryResult<(BackupRecord, bool)> {
        match self.catalog.find_by_id(backup_id).await {
            Ok(Some(record)) => Ok((record, true)),
            Ok(None) => Err(RecoveryError::NotFound {
                resource: "backup".to_string(),
                id: backup_id.to_string(),
            }),
            Err(err) => {
                warn!(backup_id, error = %err, "catalog unavailable; querying ledger");
                let record = self.ledger.query_by_id(backup_id).await?.ok_or_else(|| {
                    RecoveryError::NotFound {
                        resource: "backup".to_string(),
                        id: backup_id.to_string(),
                    }
                })?;
                Ok((record, false))
            }
        }
    }

    async fn fail(&self, backup_id: &str, err: &RecoveryError, started: Instant, applied: &[String]) {
        let elapsed = started.elapsed().as_millis() as u64;
        error!(backup_id, error = %err, applied = ?applied, "restore failed");

        self.append_event_best_effort(LedgerEvent::new(
            LedgerEventType::Failed,
            backup_id,
            "FAILED",
            serde_json::json!({
                "operation": "restore",
                "error": err.to_string(),
                "applied": applied,
            }),
            elapsed,
        ))
        .await;

        let notice = FailureNotice {
            operation: "restore".to_string(),
            backup_id: Some(backup_id.to_string()),
            error: err.to_string(),
            execution_time_ms: elapsed,
        };
        if let Err(notify_err) = self.notifier.on_restore_failed(&notice).await {
            warn!(error = %notify_err, "restore failure notification failed; ignoring");
        }
    }

    /// Restore runs must survive a flaky ledger: the audit append is
    /// attempted for every transition but never blocks the recovery itself
    async fn append_event_best_effort(&self, event: LedgerEvent) {
        if let Err(err) = self.ledger.append_event(&event).await {
            warn!(
                backup_id = %event.backup_id,
                event_type = ?event.event_type,
                error = %err,
                "ledger append failed during restore; continuing"
            );
        }
    }
}

/// Download, verify, parse and apply one FULL record
pub(crate) async fn apply_full_record(
    collections: &[Arc<dyn Collection>],
    blob_client: &dyn BlobClient,
    archive: &ArchiveBuilder,
    retry: &RetryPolicy,
    record: &BackupRecord,
    safe_mode: bool,
) -> RecoveryResult<()> {
    let bytes = download_with_retry(blob_client, &record.content_handle, retry).await?;
    crate::archive::verify_checksum(&bytes, &record.metadata.checksum)?;
    let mut parsed = archive.parse_full_archive(&bytes)?;

    for collection in collections {
        let documents = parsed.remove(collection.name()).unwrap_or_default();
        if !safe_mode {
            collection.recreate().await?;
        }
        let count = documents.len();
        collection.insert_many(documents).await?;
        debug!(
            collection = collection.name(),
            documents = count,
            backup_id = %record.backup_id,
            "applied full snapshot"
        );
    }
    Ok(())
}

/// Download, verify, parse and apply one INCREMENTAL record
pub(crate) async fn apply_incremental_record(
    collections: &[Arc<dyn Collection>],
    blob_client: &dyn BlobClient,
    archive: &ArchiveBuilder,
    retry: &RetryPolicy,
    record: &BackupRecord,
) -> RecoveryResult<()> {
    let bytes = download_with_retry(blob_client, &record.content_handle, retry).await?;
    crate::archive::verify_checksum(&bytes, &record.metadata.checksum)?;
    let payload = archive.parse_incremental_archive(&bytes)?;

    for collection in collections {
        let Some(changes) = payload.changes.get(collection.name()) else {
            continue;
        };
        if !changes.created.is_empty() {
            collection.insert_many(changes.created.clone()).await?;
        }
        for document in &changes.updated {
            collection.upsert(document.clone()).await?;
        }
        for id in &changes.deleted {
            collection.delete_by_id(id).await?;
        }
        debug!(
            collection = collection.name(),
            created = changes.created.len(),
            updated = changes.updated.len(),
            deleted = changes.deleted.len(),
            backup_id = %record.backup_id,
            "applied incremental changes"
        );
    }
    Ok(())
}

/// Rebuild secondary indexes after bulk application
pub(crate) async fn rebuild_indexes(collections: &[Arc<dyn Collection>]) -> RecoveryResult<()> {
    for collection in collections {
        collection.rebuild_indexes().await?;
    }
    Ok(())
}

/// Compare live counts against the FULL record's recorded counts
///
/// Incremental entries are not separately re-verified: their applied
/// changes make counts drift from the FULL snapshot by design.
pub(crate) async fn verify_counts(
    collections: &[Arc<dyn Collection>],
    full_record: &BackupRecord,
) -> RecoveryResult<Vec<CollectionVerification>> {
    let mut verification = Vec::with_capacity(collections.len());
    for collection in collections {
        let expected = full_record
            .metadata
            .collection_counts
            .get(collection.name())
            .copied()
            .unwrap_or(0);
        let actual = collection.count().await?;
        let entry = CollectionVerification {
            collection: collection.name().to_string(),
            expected,
            actual,
            difference: actual as i64 - expected as i64,
        };
        if !entry.matches() {
            warn!(
                collection = %entry.collection,
                expected = entry.expected,
                actual = entry.actual,
                "post-restore count mismatch"
            );
        }
        verification.push(entry);
    }
    Ok(verification)
}
