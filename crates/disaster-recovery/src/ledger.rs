//! Append-only ledger seam: the system's ultimate source of truth
//!
//! Every lifecycle transition of every backup and restore operation is
//! appended here, forming an audit trail independent of the primary
//! datastore. The read side is used exclusively when the catalog is
//! unavailable (disaster path) and for catalog rebuilds.

use crate::error::RecoveryResult;
use crate::types::{BackupRecord, LedgerEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-entity snapshot registration recorded on the ledger at entity
/// creation time, independent of the bulk backup chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRegistration {
    /// Public identifier of the entity
    pub public_id: String,
    /// Content handle of the entity's own snapshot blob
    pub content_handle: String,
    /// Registration instant
    pub registered_at: DateTime<Utc>,
}

/// Tamper-evident, append-only event log
///
/// Implementors guarantee that an appended event is never mutated or
/// removed; "deletion" of a backup is itself a new append.
#[async_trait]
pub trait LedgerAnchor: Send + Sync {
    /// Append one immutable event; returns the transaction reference
    async fn append_event(&self, event: &LedgerEvent) -> RecoveryResult<String>;

    /// Most recent FULL backup record with ACTIVE status, if any
    async fn query_latest_full(&self) -> RecoveryResult<Option<BackupRecord>>;

    /// Record by backup id
    async fn query_by_id(&self, backup_id: &str) -> RecoveryResult<Option<BackupRecord>>;

    /// ACTIVE INCREMENTAL records depending on `parent_id`, created at or
    /// before `up_to`, in ascending timestamp order
    async fn query_chain(
        &self,
        parent_id: &str,
        up_to: DateTime<Utc>,
    ) -> RecoveryResult<Vec<BackupRecord>>;

    /// Every anchored backup record, with deletion appends applied
    async fn query_records(&self) -> RecoveryResult<Vec<BackupRecord>>;

    /// Per-entity snapshot registration by public identifier
    async fn query_entity_registration(
        &self,
        public_id: &str,
    ) -> RecoveryResult<Option<EntityRegistration>>;
}
