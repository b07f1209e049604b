//! Primary-datastore seams: the `Collection` trait and the health check
//!
//! The tracked collection set is a registered list of trait objects, not a
//! schema-reflection mechanism; the engine iterates whatever implementations
//! it was constructed with.

use crate::error::RecoveryResult;
use crate::types::Document;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One named record collection of the primary datastore
///
/// The backup path only reads; the restore path is the sole mutator during
/// a restore run.
#[async_trait]
pub trait Collection: Send + Sync {
    /// Collection name, stable across backup and restore
    fn name(&self) -> &str;

    /// Every document in the collection
    async fn find_all(&self) -> RecoveryResult<Vec<Document>>;

    /// Documents whose creation time is strictly after `since`
    async fn find_created_since(&self, since: DateTime<Utc>) -> RecoveryResult<Vec<Document>>;

    /// Documents modified strictly after `since` but created at or before it
    async fn find_updated_since(&self, since: DateTime<Utc>) -> RecoveryResult<Vec<Document>>;

    /// Live document count
    async fn count(&self) -> RecoveryResult<u64>;

    /// Bulk insert
    async fn insert_many(&self, documents: Vec<Document>) -> RecoveryResult<()>;

    /// Insert or replace by document id
    async fn upsert(&self, document: Document) -> RecoveryResult<()>;

    /// Delete by document id; absent ids are not an error
    async fn delete_by_id(&self, id: &str) -> RecoveryResult<()>;

    /// Drop and recreate the collection empty
    async fn recreate(&self) -> RecoveryResult<()>;

    /// Rebuild secondary indexes after bulk application
    async fn rebuild_indexes(&self) -> RecoveryResult<()>;
}

/// Health seam for the primary datastore as a whole
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Fails when the datastore cannot serve a consistent read; a failed
    /// check aborts a backup before any write so no empty backup is ever
    /// anchored
    async fn health_check(&self) -> RecoveryResult<()>;
}
