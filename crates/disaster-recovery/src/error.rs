//! Disaster recovery error types

use thiserror::Error;

/// Disaster recovery error types
///
/// Variants are fatal unless the call site explicitly treats them as
/// advisory: unpin failures, ledger deletion marks, catalog mirroring and
/// notification delivery are logged and swallowed by the orchestrators and
/// never propagate through this type.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Primary datastore failed its pre-backup health check
    #[error("Datastore health check failed: {reason}")]
    HealthCheckFailed { reason: String },

    /// Backup operation failed
    #[error("Backup failed: {reason}")]
    BackupFailed { reason: String },

    /// Restore operation failed
    #[error("Restore failed: {reason}")]
    RestoreFailed { reason: String },

    /// Snapshot export aborted; partial per-collection success is not kept
    #[error("Export of collection {collection} failed: {reason}")]
    ExportFailed { collection: String, reason: String },

    /// Blob download exhausted its retry budget
    #[error("Download failed after {attempts} attempts: {last_error}")]
    DownloadExhausted { attempts: u32, last_error: String },

    /// Backup payload or metadata failed an integrity check
    #[error("Integrity failure: {details}")]
    IntegrityFailure { details: String },

    /// A restoration chain references a parent that cannot be resolved
    #[error("Broken chain at {backup_id}: missing parent {missing_parent}")]
    ChainBroken {
        backup_id: String,
        missing_parent: String,
    },

    /// Ledger anchor unreachable or rejected an operation
    #[error("Ledger unavailable: {details}")]
    LedgerUnavailable { details: String },

    /// Backup catalog unreachable
    #[error("Catalog unavailable: {details}")]
    CatalogUnavailable { details: String },

    /// Blob storage error
    #[error("Storage error: {details}")]
    StorageError { details: String },

    /// Single-entity recovery rejected the downloaded snapshot
    #[error("Entity verification failed: {reason}")]
    EntityVerificationFailed { reason: String },

    /// A referenced resource does not exist
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// I/O error
    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    JsonError {
        #[from]
        source: serde_json::Error,
    },
}

/// Disaster recovery result type
pub type RecoveryResult<T> = Result<T, RecoveryError>;
