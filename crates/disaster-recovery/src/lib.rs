//! Disaster recovery engine for the Vendra marketplace datastore
//!
//! This crate implements the backup/restore/disaster-recovery pipeline:
//! - Periodic full and incremental snapshots of a fixed set of critical
//!   record collections
//! - Compressed snapshot payloads in content-addressable storage
//! - Immutable backup metadata anchored on an append-only ledger, with a
//!   fast rebuildable catalog mirror in the primary datastore
//! - Keep-last-N retention with chain-aware cleanup
//! - Restoration-chain resolution and ordered application with post-restore
//!   count verification
//! - Emergency recovery from ledger + blob store alone when the primary
//!   datastore is unreachable, and single-entity recovery from per-entity
//!   snapshots
//!
//! No partial or empty backup is ever anchored; previously committed
//! backups survive the failure of any single external dependency.

#![warn(missing_docs)]

pub mod archive;
pub mod backup;
pub mod blob_client;
pub mod catalog;
pub mod collection;
pub mod error;
pub mod exporter;
pub mod ledger;
pub mod notify;
pub mod recovery;
pub mod restore;
pub mod retention;
pub mod types;

// Core error types and results
pub use error::{RecoveryError, RecoveryResult};

// Data model exports
pub use types::{
    generate_backup_id, BackupMetadata, BackupRecord, BackupStatus, BackupType, ChangeSet,
    CollectionChanges, Document, LedgerEvent, LedgerEventType, StorageBlob,
};

// Pipeline exports
pub use archive::{ArchiveBuilder, IncrementalPayload};
pub use backup::{BackupConfig, BackupOrchestrator, BackupOutcome, BackupStats};
pub use exporter::{FullExport, SnapshotExporter};

// External-collaborator seams
pub use blob_client::{download_with_retry, BlobClient, RetryPolicy};
pub use catalog::{rebuild_from_ledger, BackupCatalog, MemoryCatalog};
pub use collection::{Collection, Datastore};
pub use ledger::{EntityRegistration, LedgerAnchor};
pub use notify::{
    BackupNotice, FailureNotice, NoopNotifier, Notifier, RestoreNotice, StorageUsage,
};

// Restore and recovery exports
pub use recovery::{EntityRecoveryReport, EntitySnapshot, RecoveryService};
pub use restore::{
    CollectionVerification, RestorationReport, RestoreOptions, RestoreOrchestrator,
};
pub use retention::{RetentionManager, RetentionPolicy, SweepReport};
