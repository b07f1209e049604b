//! Notification seam
//!
//! Delivery is fire-and-forget: every call is advisory and the orchestrators
//! swallow failures so a broken notifier can never mask or abort the
//! operation it reports on. Formatting and transport live outside this crate.

use crate::error::RecoveryResult;
use crate::types::BackupType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Details of a completed backup run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupNotice {
    /// Backup id
    pub backup_id: String,
    /// Backup type
    pub backup_type: BackupType,
    /// Documents captured
    pub total_documents: u64,
    /// Compressed payload size
    pub compressed_bytes: u64,
    /// Run duration
    pub execution_time_ms: u64,
}

/// Details of a failed backup or restore run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureNotice {
    /// Operation label ("backup", "restore", "emergency_recovery")
    pub operation: String,
    /// Backup id when one was assigned before the failure
    pub backup_id: Option<String>,
    /// Error message
    pub error: String,
    /// Elapsed time at failure
    pub execution_time_ms: u64,
}

/// Details of a completed restore run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreNotice {
    /// Target backup id
    pub backup_id: String,
    /// Number of chain entries applied
    pub chain_length: usize,
    /// Collections whose post-restore count differed from the record
    pub mismatched_collections: usize,
    /// Run duration
    pub execution_time_ms: u64,
}

/// Cumulative storage consumption snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageUsage {
    /// Total compressed bytes held across ACTIVE backups
    pub total_compressed_bytes: u64,
    /// Configured threshold that was exceeded
    pub threshold_bytes: u64,
}

/// Outbound notification interface
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A backup run completed and was anchored
    async fn on_backup_succeeded(&self, notice: &BackupNotice) -> RecoveryResult<()>;

    /// A backup run failed
    async fn on_backup_failed(&self, notice: &FailureNotice) -> RecoveryResult<()>;

    /// A restore run completed
    async fn on_restore_succeeded(&self, notice: &RestoreNotice) -> RecoveryResult<()>;

    /// A restore run failed
    async fn on_restore_failed(&self, notice: &FailureNotice) -> RecoveryResult<()>;

    /// Cumulative backup storage crossed the configured threshold
    async fn on_storage_threshold_exceeded(&self, usage: &StorageUsage) -> RecoveryResult<()>;
}

/// Notifier that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn on_backup_succeeded(&self, _notice: &BackupNotice) -> RecoveryResult<()> {
        Ok(())
    }

    async fn on_backup_failed(&self, _notice: &FailureNotice) -> RecoveryResult<()> {
        Ok(())
    }

    async fn on_restore_succeeded(&self, _notice: &RestoreNotice) -> RecoveryResult<()> {
        Ok(())
    }

    async fn on_restore_failed(&self, _notice: &FailureNotice) -> RecoveryResult<()> {
        Ok(())
    }

    async fn on_storage_threshold_exceeded(&self, _usage: &StorageUsage) -> RecoveryResult<()> {
        Ok(())
    }
}
