//! Backup catalog: a fast, queryable mirror of ledger records
//!
//! The catalog lives in the primary datastore for low-latency listing and
//! lookup. It is never authoritative: if wiped, [`rebuild_from_ledger`]
//! reproduces an equivalent catalog from the ledger.

use crate::error::RecoveryResult;
use crate::ledger::LedgerAnchor;
use crate::types::{BackupRecord, BackupStatus, BackupType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

/// Queryable mirror of anchored backup records
#[async_trait]
pub trait BackupCatalog: Send + Sync {
    /// Insert or replace a record, keyed by backup id
    async fn upsert(&self, record: BackupRecord) -> RecoveryResult<()>;

    /// Record by backup id
    async fn find_by_id(&self, backup_id: &str) -> RecoveryResult<Option<BackupRecord>>;

    /// Oldest ACTIVE record created at or after `since`
    async fn find_active_since(
        &self,
        since: DateTime<Utc>,
    ) -> RecoveryResult<Option<BackupRecord>>;

    /// Records in descending timestamp order, up to `limit`
    async fn list_newest(&self, limit: usize) -> RecoveryResult<Vec<BackupRecord>>;

    /// Records in ascending timestamp order, up to `limit`
    async fn list_oldest(&self, limit: usize) -> RecoveryResult<Vec<BackupRecord>>;

    /// Every ACTIVE record, in ascending timestamp order
    async fn list_active(&self) -> RecoveryResult<Vec<BackupRecord>>;

    /// Number of ACTIVE records of one type
    async fn count_by_type(&self, backup_type: BackupType) -> RecoveryResult<u64>;

    /// Set a record's status to DELETED; absent ids are not an error so
    /// sweep re-runs stay idempotent
    async fn mark_deleted(&self, backup_id: &str) -> RecoveryResult<()>;
}

/// In-memory catalog keyed by backup id
///
/// Serves as the fast mirror in deployments whose datastore adapter keeps
/// the catalog resident, and as the test double everywhere else.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    records: DashMap<String, BackupRecord>,
}

impl MemoryCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every record, simulating a wiped mirror
    pub fn wipe(&self) {
        self.records.clear();
    }

    /// Number of records of any status
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the catalog holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn sorted(&self, ascending: bool) -> Vec<BackupRecord> {
        let mut records: Vec<BackupRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        if !ascending {
            records.reverse();
        }
        records
    }
}

#[async_trait]
impl BackupCatalog for MemoryCatalog {
    async fn upsert(&self, record: BackupRecord) -> RecoveryResult<()> {
        self.records.insert(record.backup_id.clone(), record);
        Ok(())
    }

    async fn find_by_id(&self, backup_id: &str) -> RecoveryResult<Option<BackupRecord>> {
        Ok(self.records.get(backup_id).map(|entry| entry.value().clone()))
    }

    async fn find_active_since(
        &self,
        since: DateTime<Utc>,
    ) -> RecoveryResult<Option<BackupRecord>> {
        Ok(self
            .sorted(true)
            .into_iter()
            .find(|record| record.status == BackupStatus::Active && record.timestamp >= since))
    }

    async fn list_newest(&self, limit: usize) -> RecoveryResult<Vec<BackupRecord>> {
        let mut records = self.sorted(false);
        records.truncate(limit);
        Ok(records)
    }

    async fn list_oldest(&self, limit: usize) -> RecoveryResult<Vec<BackupRecord>> {
        let mut records = self.sorted(true);
        records.truncate(limit);
        Ok(records)
    }

    async fn list_active(&self) -> RecoveryResult<Vec<BackupRecord>> {
        Ok(self
            .sorted(true)
            .into_iter()
            .filter(|record| record.status == BackupStatus::Active)
            .collect())
    }

    async fn count_by_type(&self, backup_type: BackupType) -> RecoveryResult<u64> {
        Ok(self
            .records
            .iter()
            .filter(|entry| {
                entry.value().backup_type == backup_type
                    && entry.value().status == BackupStatus::Active
            })
            .count() as u64)
    }

    async fn mark_deleted(&self, backup_id: &str) -> RecoveryResult<()> {
        if let Some(mut entry) = self.records.get_mut(backup_id) {
            entry.value_mut().status = BackupStatus::Deleted;
        }
        Ok(())
    }
}

/// Rebuild a catalog from the ledger
///
/// Idempotent: upserts are keyed by backup id, so rebuilding into a
/// non-empty catalog converges on the same contents as rebuilding into an
/// empty one.
pub async fn rebuild_from_ledger(
    catalog: &dyn BackupCatalog,
    ledger: &dyn LedgerAnchor,
) -> RecoveryResult<u64> {
    let records = ledger.query_records().await?;
    let mut restored = 0u64;
    for record in records {
        catalog.upsert(record).await?;
        restored += 1;
    }
    info!(restored, "catalog rebuilt from ledger");
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{generate_backup_id, BackupMetadata};
    use chrono::{Duration, TimeZone};

    fn record(backup_type: BackupType, at: DateTime<Utc>, status: BackupStatus) -> BackupRecord {
        BackupRecord {
            backup_id: generate_backup_id(backup_type, at),
            backup_type,
            content_handle: format!("bafy-{}", at.timestamp()),
            ledger_tx_ref: "tx".to_string(),
            timestamp: at,
            parent_backup_id: None,
            metadata: BackupMetadata::default(),
            status,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_keyed_by_backup_id() {
        let catalog = MemoryCatalog::new();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut first = record(BackupType::Full, at, BackupStatus::Active);
        catalog.upsert(first.clone()).await.unwrap();

        first.content_handle = "bafy-replaced".to_string();
        catalog.upsert(first.clone()).await.unwrap();

        assert_eq!(catalog.len(), 1);
        let found = catalog.find_by_id(&first.backup_id).await.unwrap().unwrap();
        assert_eq!(found.content_handle, "bafy-replaced");
    }

    #[tokio::test]
    async fn test_listing_order_and_limits() {
        let catalog = MemoryCatalog::new();
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        for hour in 0..5 {
            catalog
                .upsert(record(
                    BackupType::Full,
                    base + Duration::hours(hour),
                    BackupStatus::Active,
                ))
                .await
                .unwrap();
        }

        let newest = catalog.list_newest(2).await.unwrap();
        assert_eq!(newest.len(), 2);
        assert!(newest[0].timestamp > newest[1].timestamp);

        let oldest = catalog.list_oldest(2).await.unwrap();
        assert_eq!(oldest[0].timestamp, base);
    }

    #[tokio::test]
    async fn test_count_by_type_ignores_deleted() {
        let catalog = MemoryCatalog::new();
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        catalog
            .upsert(record(BackupType::Full, base, BackupStatus::Active))
            .await
            .unwrap();
        catalog
            .upsert(record(
                BackupType::Full,
                base + Duration::hours(1),
                BackupStatus::Deleted,
            ))
            .await
            .unwrap();

        assert_eq!(catalog.count_by_type(BackupType::Full).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_deleted_is_idempotent() {
        let catalog = MemoryCatalog::new();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let rec = record(BackupType::Incremental, at, BackupStatus::Active);
        catalog.upsert(rec.clone()).await.unwrap();

        catalog.mark_deleted(&rec.backup_id).await.unwrap();
        catalog.mark_deleted(&rec.backup_id).await.unwrap();
        catalog.mark_deleted("never-existed").await.unwrap();

        let found = catalog.find_by_id(&rec.backup_id).await.unwrap().unwrap();
        assert_eq!(found.status, BackupStatus::Deleted);
    }
}
