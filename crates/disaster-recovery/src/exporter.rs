//! Snapshot exporter: read-only extraction of the tracked collections

use crate::collection::Collection;
use crate::error::{RecoveryError, RecoveryResult};
use crate::types::{ChangeSet, CollectionChanges, Document};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything in every tracked collection at one point in time
#[derive(Debug, Clone)]
pub struct FullExport {
    /// Documents per collection name
    pub collections: BTreeMap<String, Vec<Document>>,
    /// Total documents across all collections
    pub total_documents: u64,
}

impl FullExport {
    /// Document count per collection
    pub fn collection_counts(&self) -> BTreeMap<String, u64> {
        self.collections
            .iter()
            .map(|(name, docs)| (name.clone(), docs.len() as u64))
            .collect()
    }
}

/// Reads the fixed set of tracked collections
///
/// Exports are all-or-nothing: a read failure on any collection aborts the
/// whole export, so a partially exported snapshot never reaches the archive
/// builder.
pub struct SnapshotExporter {
    collections: Vec<Arc<dyn Collection>>,
}

impl SnapshotExporter {
    /// Exporter over a registered collection set
    pub fn new(collections: Vec<Arc<dyn Collection>>) -> Self {
        Self { collections }
    }

    /// The registered collection handles
    pub fn collections(&self) -> &[Arc<dyn Collection>] {
        &self.collections
    }

    /// Export every document in every tracked collection
    pub async fn export_full(&self) -> RecoveryResult<FullExport> {
        let mut collections = BTreeMap::new();
        let mut total_documents = 0u64;

        for collection in &self.collections {
            let documents = collection.find_all().await.map_err(|err| {
                RecoveryError::ExportFailed {
                    collection: collection.name().to_string(),
                    reason: err.to_string(),
                }
            })?;
            debug!(
                collection = collection.name(),
                documents = documents.len(),
                "exported collection"
            );
            total_documents += documents.len() as u64;
            collections.insert(collection.name().to_string(), documents);
        }

        info!(total_documents, "full export complete");
        Ok(FullExport {
            collections,
            total_documents,
        })
    }

    /// Export documents created or updated since `since`
    ///
    /// An all-zero changeset is the skip signal: the caller must treat it as
    /// a no-op, not an error or a stored backup.
    pub async fn export_changes(&self, since: DateTime<Utc>) -> RecoveryResult<ChangeSet> {
        let mut collections = BTreeMap::new();

        for collection in &self.collections {
            let name = collection.name().to_string();
            let created = collection.find_created_since(since).await.map_err(|err| {
                RecoveryError::ExportFailed {
                    collection: name.clone(),
                    reason: err.to_string(),
                }
            })?;
            let updated = collection.find_updated_since(since).await.map_err(|err| {
                RecoveryError::ExportFailed {
                    collection: name.clone(),
                    reason: err.to_string(),
                }
            })?;

            debug!(
                collection = %name,
                created = created.len(),
                updated = updated.len(),
                "exported changes"
            );
            collections.insert(
                name,
                CollectionChanges {
                    created,
                    updated,
                    deleted: Vec::new(),
                },
            );
        }

        let changeset = ChangeSet { since, collections };
        info!(
            total_changes = changeset.total_changes(),
            %since,
            "incremental export complete"
        );
        Ok(changeset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use parking_lot::RwLock;

    /// In-memory collection with optional injected read failure
    pub(crate) struct MemoryCollection {
        name: String,
        documents: RwLock<Vec<Document>>,
        fail_reads: RwLock<bool>,
    }

    impl MemoryCollection {
        pub(crate) fn new(name: &str, documents: Vec<Document>) -> Self {
            Self {
                name: name.to_string(),
                documents: RwLock::new(documents),
                fail_reads: RwLock::new(false),
            }
        }

        pub(crate) fn fail_reads(&self) {
            *self.fail_reads.write() = true;
        }

        fn check(&self) -> RecoveryResult<()> {
            if *self.fail_reads.read() {
                return Err(RecoveryError::StorageError {
                    details: "simulated read failure".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Collection for MemoryCollection {
        fn name(&self) -> &str {
            &self.name
        }

        async fn find_all(&self) -> RecoveryResult<Vec<Document>> {
            self.check()?;
            Ok(self.documents.read().clone())
        }

        async fn find_created_since(&self, since: DateTime<Utc>) -> RecoveryResult<Vec<Document>> {
            self.check()?;
            Ok(self
                .documents
                .read()
                .iter()
                .filter(|doc| doc.created_at > since)
                .cloned()
                .collect())
        }

        async fn find_updated_since(&self, since: DateTime<Utc>) -> RecoveryResult<Vec<Document>> {
            self.check()?;
            Ok(self
                .documents
                .read()
                .iter()
                .filter(|doc| doc.updated_at > since && doc.created_at <= since)
                .cloned()
                .collect())
        }

        async fn count(&self) -> RecoveryResult<u64> {
            Ok(self.documents.read().len() as u64)
        }

        async fn insert_many(&self, documents: Vec<Document>) -> RecoveryResult<()> {
            self.documents.write().extend(documents);
            Ok(())
        }

        async fn upsert(&self, document: Document) -> RecoveryResult<()> {
            let mut docs = self.documents.write();
            if let Some(existing) = docs.iter_mut().find(|d| d.id == document.id) {
                *existing = document;
            } else {
                docs.push(document);
            }
            Ok(())
        }

        async fn delete_by_id(&self, id: &str) -> RecoveryResult<()> {
            self.documents.write().retain(|doc| doc.id != id);
            Ok(())
        }

        async fn recreate(&self) -> RecoveryResult<()> {
            self.documents.write().clear();
            Ok(())
        }

        async fn rebuild_indexes(&self) -> RecoveryResult<()> {
            Ok(())
        }
    }

    fn doc_at(id: &str, created: DateTime<Utc>, updated: DateTime<Utc>) -> Document {
        Document {
            id: id.to_string(),
            owner_id: None,
            customer_id: None,
            seller_id: None,
            created_at: created,
            updated_at: updated,
            data: serde_json::json!({}),
        }
    }

    fn docs(count: usize, prefix: &str) -> Vec<Document> {
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| doc_at(&format!("{prefix}-{i}"), at, at))
            .collect()
    }

    #[tokio::test]
    async fn test_full_export_counts_per_collection() {
        let exporter = SnapshotExporter::new(vec![
            Arc::new(MemoryCollection::new("orders", docs(10, "o"))),
            Arc::new(MemoryCollection::new("products", docs(0, "p"))),
            Arc::new(MemoryCollection::new("users", docs(5, "u"))),
        ]);

        let export = exporter.export_full().await.unwrap();
        assert_eq!(export.total_documents, 15);
        let counts = export.collection_counts();
        assert_eq!(counts["orders"], 10);
        assert_eq!(counts["products"], 0);
        assert_eq!(counts["users"], 5);
    }

    #[tokio::test]
    async fn test_full_export_is_all_or_nothing() {
        let failing = Arc::new(MemoryCollection::new("products", docs(3, "p")));
        failing.fail_reads();
        let exporter = SnapshotExporter::new(vec![
            Arc::new(MemoryCollection::new("orders", docs(10, "o"))),
            failing,
        ]);

        let err = exporter.export_full().await.unwrap_err();
        match err {
            RecoveryError::ExportFailed { collection, .. } => {
                assert_eq!(collection, "products");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_changes_split_created_and_updated() {
        let since = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let collection = MemoryCollection::new(
            "orders",
            vec![
                // created after the reference timestamp
                doc_at("new", since + Duration::hours(1), since + Duration::hours(1)),
                // created before, modified after
                doc_at(
                    "changed",
                    since - Duration::hours(1),
                    since + Duration::hours(2),
                ),
                // untouched
                doc_at("old", since - Duration::days(1), since - Duration::days(1)),
            ],
        );
        let exporter = SnapshotExporter::new(vec![Arc::new(collection)]);

        let changeset = exporter.export_changes(since).await.unwrap();
        let changes = &changeset.collections["orders"];
        assert_eq!(changes.created.len(), 1);
        assert_eq!(changes.created[0].id, "new");
        assert_eq!(changes.updated.len(), 1);
        assert_eq!(changes.updated[0].id, "changed");
        assert!(changes.deleted.is_empty());
    }

    #[tokio::test]
    async fn test_no_changes_yields_empty_changeset() {
        let since = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let old = since - Duration::days(2);
        let exporter = SnapshotExporter::new(vec![Arc::new(MemoryCollection::new(
            "orders",
            vec![doc_at("old", old, old)],
        ))]);

        let changeset = exporter.export_changes(since).await.unwrap();
        assert!(changeset.is_empty());
        assert_eq!(changeset.total_changes(), 0);
    }
}
