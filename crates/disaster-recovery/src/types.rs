//! Shared data model for the backup/restore pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Backup type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupType {
    /// Complete snapshot of every tracked collection
    Full,
    /// Documents created or updated since a prior backup
    Incremental,
}

impl BackupType {
    /// Backup id prefix for this type
    pub fn prefix(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incr",
        }
    }
}

/// Backup record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    /// Backup is available for restoration
    Active,
    /// Backup was retired by the retention manager
    Deleted,
    /// Backup run failed before anchoring
    Failed,
}

/// Size and count metadata for one snapshot artifact
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Document count per collection
    pub collection_counts: BTreeMap<String, u64>,
    /// Total documents across all collections
    pub total_documents: u64,
    /// Serialized payload size before compression
    pub uncompressed_bytes: u64,
    /// Payload size after compression
    pub compressed_bytes: u64,
    /// Percentage reduction achieved by compression, one decimal
    pub compression_ratio_pct: f64,
    /// Hex sha256 of the compressed payload
    pub checksum: String,
}

/// Canonical record of one snapshot artifact
///
/// Durable only once the payload is uploaded and the record is anchored on
/// the ledger; the catalog holds a rebuildable mirror of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Globally unique, human-sortable id (type prefix + UTC timestamp)
    pub backup_id: String,
    /// Backup type
    pub backup_type: BackupType,
    /// Content handle returned by the blob store
    pub content_handle: String,
    /// Reference to the anchoring ledger event
    pub ledger_tx_ref: String,
    /// Creation instant
    pub timestamp: DateTime<Utc>,
    /// FULL ancestor for INCREMENTAL records, None for FULL
    pub parent_backup_id: Option<String>,
    /// Count and size metadata
    pub metadata: BackupMetadata,
    /// Record status
    pub status: BackupStatus,
}

/// Generate a backup id: type prefix plus millisecond UTC timestamp,
/// lexicographically sortable within a type.
pub fn generate_backup_id(backup_type: BackupType, at: DateTime<Utc>) -> String {
    format!("{}-{}", backup_type.prefix(), at.format("%Y%m%dT%H%M%S%3fZ"))
}

/// Per-collection incremental changes
///
/// `deleted` is carried for format compatibility but is always empty:
/// the exporter has no delete-tracking source (a soft-delete or audit log
/// upstream is assumed if exact delete propagation is required).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionChanges {
    /// Documents created after the reference timestamp
    pub created: Vec<Document>,
    /// Documents modified after the reference timestamp but created before it
    pub updated: Vec<Document>,
    /// Ids of deleted documents (always empty, see above)
    pub deleted: Vec<String>,
}

impl CollectionChanges {
    /// Total number of changed documents
    pub fn total(&self) -> u64 {
        (self.created.len() + self.updated.len() + self.deleted.len()) as u64
    }
}

/// Incremental payload: created/updated documents per collection since a
/// reference timestamp. Owned by the run that produced it; immutable once
/// anchored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Reference timestamp the changes are relative to
    pub since: DateTime<Utc>,
    /// Changes per collection name
    pub collections: BTreeMap<String, CollectionChanges>,
}

impl ChangeSet {
    /// Total changed documents across all collections
    pub fn total_changes(&self) -> u64 {
        self.collections.values().map(CollectionChanges::total).sum()
    }

    /// True when no collection has any change; callers treat this as the
    /// skip signal, not an error
    pub fn is_empty(&self) -> bool {
        self.total_changes() == 0
    }
}

/// Ledger event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventType {
    /// Operation started
    Started,
    /// Operation completed; carries the canonical BackupRecord for backups
    Completed,
    /// Operation failed
    Failed,
    /// Backup retired by the retention manager
    Deleted,
    /// Per-entity snapshot registration
    EntityRegistered,
}

/// Append-only lifecycle event; the authoritative audit trail and the
/// fallback metadata source when the catalog is unreachable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Event id
    pub event_id: Uuid,
    /// Event type
    pub event_type: LedgerEventType,
    /// Backup or operation id the event describes
    pub backup_id: String,
    /// Status label at the time of the event
    pub status: String,
    /// Event payload (canonical record for completed backups)
    pub data: serde_json::Value,
    /// Elapsed operation time when the event was emitted
    pub execution_time_ms: u64,
    /// Append instant
    pub timestamp: DateTime<Utc>,
}

impl LedgerEvent {
    /// Build an event with a fresh id stamped at now
    pub fn new(
        event_type: LedgerEventType,
        backup_id: impl Into<String>,
        status: impl Into<String>,
        data: serde_json::Value,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            backup_id: backup_id.into(),
            status: status.into(),
            data,
            execution_time_ms,
            timestamp: Utc::now(),
        }
    }
}

/// Handle to one uploaded payload in the content-addressable store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBlob {
    /// Content handle, deterministically derived from content
    pub content_handle: String,
    /// Uploaded payload length in bytes
    pub byte_length: u64,
}

/// One datastore document with the denormalized foreign keys the archive
/// line format carries for partial extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document id, unique within its collection
    pub id: String,
    /// Owning account id, when the entity has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Customer id, when the entity has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Seller id, when the entity has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<String>,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Last modification instant
    pub updated_at: DateTime<Utc>,
    /// Entity body
    pub data: serde_json::Value,
}

impl Document {
    /// Minimal document with body only
    pub fn new(id: impl Into<String>, data: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            owner_id: None,
            customer_id: None,
            seller_id: None,
            created_at: now,
            updated_at: now,
            data,
        }
    }
}
