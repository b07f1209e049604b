//! Retention policy enforcement and storage reclamation
//!
//! The sweep retires ACTIVE backups beyond the configured windows. Per
//! backup the order is fixed: unpin the blob, append the `deleted` ledger
//! event, mark the catalog record. A crash mid-sweep can therefore leave an
//! ACTIVE record pointing at unpinned content, which is an acceptable
//! degraded state: re-running the sweep is idempotent because unpinning is.

use crate::blob_client::{unpin_best_effort, BlobClient};
use crate::catalog::BackupCatalog;
use crate::error::RecoveryResult;
use crate::ledger::LedgerAnchor;
use crate::types::{BackupRecord, BackupType, LedgerEvent, LedgerEventType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Keep-last-N retention windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Most recent FULL backups to keep
    pub max_full: usize,
    /// Most recent INCREMENTAL backups to keep
    pub max_incremental: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_full: 3,
            max_incremental: 9,
        }
    }
}

/// Outcome of one retention sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    /// Backups retired by this sweep
    pub deleted_count: u64,
    /// Expired FULL backups kept because an ACTIVE INCREMENTAL still
    /// depends on them
    pub protected_count: u64,
}

/// Enforces the retention policy against catalog, ledger and blob store
pub struct RetentionManager {
    catalog: Arc<dyn BackupCatalog>,
    ledger: Arc<dyn LedgerAnchor>,
    blob_client: Arc<dyn BlobClient>,
    policy: RetentionPolicy,
}

impl RetentionManager {
    /// Manager over the shared clients
    pub fn new(
        catalog: Arc<dyn BackupCatalog>,
        ledger: Arc<dyn LedgerAnchor>,
        blob_client: Arc<dyn BlobClient>,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            catalog,
            ledger,
            blob_client,
            policy,
        }
    }

    /// The active policy
    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Retire ACTIVE backups beyond the retention windows
    ///
    /// Ledger history is never erased: retirement appends a `deleted` event
    /// and flips the catalog status. A FULL backup that is still the parent
    /// of a surviving ACTIVE INCREMENTAL is never retired.
    pub async fn sweep(&self) -> RecoveryResult<SweepReport> {
        let active = self.catalog.list_active().await?;

        let fulls: Vec<&BackupRecord> = active
            .iter()
            .filter(|record| record.backup_type == BackupType::Full)
            .collect();
        let incrementals: Vec<&BackupRecord> = active
            .iter()
            .filter(|record| record.backup_type == BackupType::Incremental)
            .collect();

        // list_active is ascending, so the expired entries are the head
        let expired_incrementals: Vec<&BackupRecord> = if incrementals.len()
            > self.policy.max_incremental
        {
            incrementals[..incrementals.len() - self.policy.max_incremental].to_vec()
        } else {
            Vec::new()
        };
        let expired_fulls: Vec<&BackupRecord> = if fulls.len() > self.policy.max_full {
            fulls[..fulls.len() - self.policy.max_full].to_vec()
        } else {
            Vec::new()
        };

        let retired_incremental_ids: HashSet<&str> = expired_incrementals
            .iter()
            .map(|record| record.backup_id.as_str())
            .collect();
        // Parents of the incrementals that survive this sweep
        let protected_parents: HashSet<&str> = incrementals
            .iter()
            .filter(|record| !retired_incremental_ids.contains(record.backup_id.as_str()))
            .filter_map(|record| record.parent_backup_id.as_deref())
            .collect();

        let mut report = SweepReport::default();

        for record in &expired_incrementals {
            if self.retire(record).await {
                report.deleted_count += 1;
            }
        }
        for record in &expired_fulls {
            if protected_parents.contains(record.backup_id.as_str()) {
                debug!(
                    backup_id = %record.backup_id,
                    "expired FULL backup kept; an active incremental depends on it"
                );
                report.protected_count += 1;
                continue;
            }
            if self.retire(record).await {
                report.deleted_count += 1;
            }
        }

        info!(
            deleted = report.deleted_count,
            protected = report.protected_count,
            "retention sweep complete"
        );
        Ok(report)
    }

    /// Retire one backup; returns whether the catalog mark succeeded
    async fn retire(&self, record: &BackupRecord) -> bool {
        unpin_best_effort(self.blob_client.as_ref(), &record.content_handle).await;

        let event = LedgerEvent::new(
            LedgerEventType::Deleted,
            &record.backup_id,
            "DELETED",
            serde_json::json!({ "reason": "retention" }),
            0,
        );
        if let Err(err) = self.ledger.append_event(&event).await {
            warn!(
                backup_id = %record.backup_id,
                error = %err,
                "ledger deletion mark failed; continuing"
            );
        }

        match self.catalog.mark_deleted(&record.backup_id).await {
            Ok(()) => {
                info!(backup_id = %record.backup_id, "backup retired");
                true
            }
            Err(err) => {
                warn!(
                    backup_id = %record.backup_id,
                    error = %err,
                    "catalog deletion mark failed; next sweep will retry"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::error::RecoveryResult;
    use crate::types::{generate_backup_id, BackupMetadata, BackupStatus, StorageBlob};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingBlobClient {
        unpinned: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobClient for RecordingBlobClient {
        async fn put(
            &self,
            bytes: Vec<u8>,
            _name: &str,
            _tags: &HashMap<String, String>,
        ) -> RecoveryResult<StorageBlob> {
            Ok(StorageBlob {
                content_handle: "bafy".to_string(),
                byte_length: bytes.len() as u64,
            })
        }

        async fn get(&self, _content_handle: &str) -> RecoveryResult<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn unpin(&self, content_handle: &str) -> RecoveryResult<()> {
            self.unpinned.lock().push(content_handle.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingLedger {
        events: Mutex<Vec<LedgerEvent>>,
    }

    #[async_trait]
    impl LedgerAnchor for RecordingLedger {
        async fn append_event(&self, event: &LedgerEvent) -> RecoveryResult<String> {
            self.events.lock().push(event.clone());
            Ok(format!("tx-{}", self.events.lock().len()))
        }

        async fn query_latest_full(&self) -> RecoveryResult<Option<BackupRecord>> {
            Ok(None)
        }

        async fn query_by_id(&self, _backup_id: &str) -> RecoveryResult<Option<BackupRecord>> {
            Ok(None)
        }

        async fn query_chain(
            &self,
            _parent_id: &str,
            _up_to: DateTime<Utc>,
        ) -> RecoveryResult<Vec<BackupRecord>> {
            Ok(Vec::new())
        }

        async fn query_records(&self) -> RecoveryResult<Vec<BackupRecord>> {
            Ok(Vec::new())
        }

        async fn query_entity_registration(
            &self,
            _public_id: &str,
        ) -> RecoveryResult<Option<crate::ledger::EntityRegistration>> {
            Ok(None)
        }
    }

    fn record(
        backup_type: BackupType,
        at: DateTime<Utc>,
        parent: Option<&str>,
    ) -> BackupRecord {
        BackupRecord {
            backup_id: generate_backup_id(backup_type, at),
            backup_type,
            content_handle: format!("bafy-{}-{}", backup_type.prefix(), at.timestamp()),
            ledger_tx_ref: "tx".to_string(),
            timestamp: at,
            parent_backup_id: parent.map(str::to_string),
            metadata: BackupMetadata::default(),
            status: BackupStatus::Active,
        }
    }

    async fn seed_fulls(catalog: &MemoryCatalog, count: i64) -> Vec<BackupRecord> {
        let base = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let mut records = Vec::new();
        for day in 0..count {
            let rec = record(BackupType::Full, base + Duration::days(day), None);
            catalog.upsert(rec.clone()).await.unwrap();
            records.push(rec);
        }
        records
    }

    #[tokio::test]
    async fn test_sweep_deletes_exactly_the_oldest_extras() {
        let catalog = Arc::new(MemoryCatalog::new());
        let ledger = Arc::new(RecordingLedger::default());
        let blob = Arc::new(RecordingBlobClient::default());
        let records = seed_fulls(&catalog, 5).await;

        let manager = RetentionManager::new(
            catalog.clone(),
            ledger.clone(),
            blob.clone(),
            RetentionPolicy {
                max_full: 3,
                max_incremental: 9,
            },
        );

        let report = manager.sweep().await.unwrap();
        assert_eq!(report.deleted_count, 2);

        let active = catalog.list_active().await.unwrap();
        assert_eq!(active.len(), 3);
        // The 3 newest survive
        for survivor in &records[2..] {
            assert!(active.iter().any(|r| r.backup_id == survivor.backup_id));
        }
        // Unpin happened for exactly the 2 oldest
        assert_eq!(blob.unpinned.lock().len(), 2);
        // Each retirement appended a deleted ledger event
        let events = ledger.events.lock();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|event| event.event_type == LedgerEventType::Deleted));
    }

    #[tokio::test]
    async fn test_sweep_protects_parent_of_active_incremental() {
        let catalog = Arc::new(MemoryCatalog::new());
        let ledger = Arc::new(RecordingLedger::default());
        let blob = Arc::new(RecordingBlobClient::default());
        let base = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

        // Oldest full is beyond the window of 1 but still parents an
        // active incremental
        let old_full = record(BackupType::Full, base, None);
        let new_full = record(BackupType::Full, base + Duration::days(2), None);
        let incremental = record(
            BackupType::Incremental,
            base + Duration::hours(6),
            Some(&old_full.backup_id),
        );
        catalog.upsert(old_full.clone()).await.unwrap();
        catalog.upsert(new_full.clone()).await.unwrap();
        catalog.upsert(incremental.clone()).await.unwrap();

        let manager = RetentionManager::new(
            catalog.clone(),
            ledger,
            blob,
            RetentionPolicy {
                max_full: 1,
                max_incremental: 9,
            },
        );

        let report = manager.sweep().await.unwrap();
        assert_eq!(report.deleted_count, 0);
        assert_eq!(report.protected_count, 1);

        let found = catalog.find_by_id(&old_full.backup_id).await.unwrap().unwrap();
        assert_eq!(found.status, BackupStatus::Active);
    }

    #[tokio::test]
    async fn test_sweep_rerun_is_idempotent() {
        let catalog = Arc::new(MemoryCatalog::new());
        let ledger = Arc::new(RecordingLedger::default());
        let blob = Arc::new(RecordingBlobClient::default());
        seed_fulls(&catalog, 5).await;

        let manager = RetentionManager::new(
            catalog.clone(),
            ledger,
            blob,
            RetentionPolicy::default(),
        );

        let first = manager.sweep().await.unwrap();
        assert_eq!(first.deleted_count, 2);
        let second = manager.sweep().await.unwrap();
        assert_eq!(second.deleted_count, 0);
        assert_eq!(catalog.list_active().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_sweep_within_window_is_a_noop() {
        let catalog = Arc::new(MemoryCatalog::new());
        let ledger = Arc::new(RecordingLedger::default());
        let blob = Arc::new(RecordingBlobClient::default());
        seed_fulls(&catalog, 2).await;

        let manager = RetentionManager::new(
            catalog.clone(),
            ledger,
            blob.clone(),
            RetentionPolicy::default(),
        );

        let report = manager.sweep().await.unwrap();
        assert_eq!(report.deleted_count, 0);
        assert!(blob.unpinned.lock().is_empty());
    }
}
