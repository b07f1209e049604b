//! Disaster paths that bypass the primary datastore
//!
//! Emergency recovery runs when the catalog (and with it the primary
//! datastore) is confirmed unreachable: the ledger is queried directly for
//! the most recent FULL backup and only that snapshot is applied. Bounded
//! data loss back to the last FULL is the accepted trade for recovering
//! with no dependency on the datastore being restored.
//!
//! Entity recovery restores a single identity record from its own
//! content-addressable snapshot, registered on the ledger at creation time
//! independently of the bulk backup chain.

use crate::archive::ArchiveBuilder;
use crate::blob_client::{download_with_retry, BlobClient, RetryPolicy};
use crate::collection::Collection;
use crate::error::{RecoveryError, RecoveryResult};
use crate::ledger::LedgerAnchor;
use crate::notify::{FailureNotice, Notifier, RestoreNotice};
use crate::restore::{
    apply_full_record, rebuild_indexes, verify_counts, RestorationReport,
};
use crate::types::{BackupStatus, BackupType, Document, LedgerEvent, LedgerEventType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Per-entity snapshot blob, uploaded at entity registration time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    /// Public identifier embedded at snapshot time
    pub public_id: String,
    /// Hex sha256 of the entity's recovery credential
    pub credential_hash: String,
    /// The identity record itself
    pub record: Document,
}

/// Outcome of a single-entity recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecoveryReport {
    /// Recovered entity's public identifier
    pub public_id: String,
    /// Content handle the record was recovered from
    pub content_handle: String,
    /// Run duration
    pub execution_time_ms: u64,
    /// Completion instant
    pub recovered_at: DateTime<Utc>,
}

/// Emergency and single-entity recovery over ledger + blob store only
pub struct RecoveryService {
    collections: Vec<Arc<dyn Collection>>,
    identity_collection: Arc<dyn Collection>,
    blob_client: Arc<dyn BlobClient>,
    ledger: Arc<dyn LedgerAnchor>,
    notifier: Arc<dyn Notifier>,
    archive: ArchiveBuilder,
    retry: RetryPolicy,
}

impl RecoveryService {
    /// Service over constructor-injected collaborators
    ///
    /// `identity_collection` is the one trusted collection single-entity
    /// recovery may write to.
    pub fn new(
        collections: Vec<Arc<dyn Collection>>,
        identity_collection: Arc<dyn Collection>,
        blob_client: Arc<dyn BlobClient>,
        ledger: Arc<dyn LedgerAnchor>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            collections,
            identity_collection,
            blob_client,
            ledger,
            notifier,
            archive: ArchiveBuilder::default(),
            retry,
        }
    }

    /// Best-effort restore of the most recent FULL backup, using only the
    /// ledger and the blob store
    ///
    /// Incrementals are intentionally not chained here: this path must not
    /// depend on catalog queries against the datastore it is restoring.
    pub async fn emergency_recover(&self) -> RecoveryResult<RestorationReport> {
        let started = Instant::now();
        info!("emergency recovery started; bypassing catalog");

        let outcome = self.run_emergency(started).await;
        match &outcome {
            Ok(report) => {
                self.append_event_best_effort(LedgerEvent::new(
                    LedgerEventType::Completed,
                    &report.target_backup_id,
                    "RESTORED",
                    serde_json::json!({ "operation": "emergency_recovery" }),
                    report.execution_time_ms,
                ))
                .await;
                let notice = RestoreNotice {
                    backup_id: report.target_backup_id.clone(),
                    chain_length: report.applied.len(),
                    mismatched_collections: report.mismatches(),
                    execution_time_ms: report.execution_time_ms,
                };
                if let Err(err) = self.notifier.on_restore_succeeded(&notice).await {
                    warn!(error = %err, "emergency recovery notification failed; ignoring");
                }
                info!(
                    backup_id = %report.target_backup_id,
                    mismatches = report.mismatches(),
                    execution_time_ms = report.execution_time_ms,
                    "emergency recovery complete"
                );
            }
            Err(err) => {
                let elapsed = started.elapsed().as_millis() as u64;
                error!(error = %err, "emergency recovery failed");
                self.append_event_best_effort(LedgerEvent::new(
                    LedgerEventType::Failed,
                    "emergency",
                    "FAILED",
                    serde_json::json!({
                        "operation": "emergency_recovery",
                        "error": err.to_string(),
                    }),
                    elapsed,
                ))
                .await;
                let notice = FailureNotice {
                    operation: "emergency_recovery".to_string(),
                    backup_id: None,
                    error: err.to_string(),
                    execution_time_ms: elapsed,
                };
                if let Err(notify_err) = self.notifier.on_restore_failed(&notice).await {
                    warn!(error = %notify_err, "failure notification failed; ignoring");
                }
            }
        }
        outcome
    }

    async fn run_emergency(&self, started: Instant) -> RecoveryResult<RestorationReport> {
        let records = self.ledger.query_records().await?;
        let latest_full = records
            .into_iter()
            .filter(|record| {
                record.backup_type == BackupType::Full && record.status == BackupStatus::Active
            })
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp))
            .ok_or_else(|| RecoveryError::NotFound {
                resource: "FULL backup".to_string(),
                id: "<ledger>".to_string(),
            })?;

        self.append_event_best_effort(LedgerEvent::new(
            LedgerEventType::Started,
            &latest_full.backup_id,
            "RESTORING",
            serde_json::json!({ "operation": "emergency_recovery" }),
            0,
        ))
        .await;

        apply_full_record(
            &self.collections,
            self.blob_client.as_ref(),
            &self.archive,
            &self.retry,
            &latest_full,
            false,
        )
        .await?;
        rebuild_indexes(&self.collections).await?;
        let verification = verify_counts(&self.collections, &latest_full).await?;

        Ok(RestorationReport {
            target_backup_id: latest_full.backup_id.clone(),
            chain: vec![latest_full.backup_id.clone()],
            applied: vec![latest_full.backup_id],
            safe_mode: false,
            verification,
            execution_time_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        })
    }

    /// Recover one identity record from its per-entity snapshot
    ///
    /// The embedded identifier must match the query and the supplied
    /// credential must hash to the embedded credential hash; on any
    /// mismatch nothing is written.
    pub async fn recover_entity(
        &self,
        public_id: &str,
        credential: &str,
    ) -> RecoveryResult<EntityRecoveryReport> {
        let started = Instant::now();
        info!(public_id, "entity recovery started");

        let registration = self
            .ledger
            .query_entity_registration(public_id)
            .await?
            .ok_or_else(|| RecoveryError::NotFound {
                resource: "entity registration".to_string(),
                id: public_id.to_string(),
            })?;

        let bytes =
            download_with_retry(self.blob_client.as_ref(), &registration.content_handle, &self.retry)
                .await?;
        let snapshot: EntitySnapshot =
            serde_json::from_slice(&bytes).map_err(|err| RecoveryError::IntegrityFailure {
                details: format!("malformed entity snapshot: {err}"),
            })?;

        if snapshot.public_id != public_id {
            return Err(RecoveryError::EntityVerificationFailed {
                reason: format!(
                    "snapshot identifier {} does not match query {}",
                    snapshot.public_id, public_id
                ),
            });
        }
        let supplied_hash = hex::encode(Sha256::digest(credential.as_bytes()));
        if !supplied_hash.eq_ignore_ascii_case(&snapshot.credential_hash) {
            return Err(RecoveryError::EntityVerificationFailed {
                reason: "credential hash mismatch".to_string(),
            });
        }

        self.identity_collection.upsert(snapshot.record).await?;

        let report = EntityRecoveryReport {
            public_id: public_id.to_string(),
            content_handle: registration.content_handle,
            execution_time_ms: started.elapsed().as_millis() as u64,
            recovered_at: Utc::now(),
        };
        info!(
            public_id,
            execution_time_ms = report.execution_time_ms,
            "entity recovery complete"
        );
        Ok(report)
    }

    async fn append_event_best_effort(&self, event: LedgerEvent) {
        if let Err(err) = self.ledger.append_event(&event).await {
            warn!(
                backup_id = %event.backup_id,
                event_type = ?event.event_type,
                error = %err,
                "ledger append failed during recovery; continuing"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_snapshot_wire_format() {
        let snapshot = EntitySnapshot {
            public_id: "did:vendra:seller-42".to_string(),
            credential_hash: hex::encode(Sha256::digest(b"hunter2")),
            record: Document::new("seller-42", serde_json::json!({ "name": "Acme" })),
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["publicId"], "did:vendra:seller-42");
        assert!(value["credentialHash"].is_string());

        let parsed: EntitySnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.record.id, "seller-42");
    }
}
