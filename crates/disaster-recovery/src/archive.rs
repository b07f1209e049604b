//! Archive construction and parsing for snapshot payloads
//!
//! FULL archives are gzip-compressed line-delimited JSON: one record per
//! document, tagged with its collection and denormalized foreign keys so a
//! later partial extraction does not need full deserialization. INCREMENTAL
//! archives are small by construction and ship as a single gzip-compressed
//! JSON document embedding the parent linkage for chain traversal.

use crate::error::{RecoveryError, RecoveryResult};
use crate::exporter::FullExport;
use crate::types::{BackupMetadata, BackupType, ChangeSet, CollectionChanges, Document};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use tracing::debug;

/// One line of a FULL archive
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveLine {
    /// Collection the record belongs to
    #[serde(rename = "type")]
    record_type: String,
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seller_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    data: serde_json::Value,
}

impl ArchiveLine {
    fn from_document(collection: &str, document: &Document) -> Self {
        Self {
            record_type: collection.to_string(),
            id: document.id.clone(),
            owner_id: document.owner_id.clone(),
            customer_id: document.customer_id.clone(),
            seller_id: document.seller_id.clone(),
            created_at: document.created_at,
            updated_at: document.updated_at,
            data: document.data.clone(),
        }
    }

    fn into_document(self) -> Document {
        Document {
            id: self.id,
            owner_id: self.owner_id,
            customer_id: self.customer_id,
            seller_id: self.seller_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            data: self.data,
        }
    }
}

/// Decompressed INCREMENTAL artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalPayload {
    /// Id of the backup run that produced this payload
    pub backup_id: String,
    /// Always [`BackupType::Incremental`]
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    /// Payload creation instant
    pub timestamp: DateTime<Utc>,
    /// FULL ancestor backup id
    pub parent_backup: String,
    /// FULL ancestor content handle, for chain traversal without a catalog
    pub parent_cid: String,
    /// Changes per collection
    pub changes: BTreeMap<String, CollectionChanges>,
    /// Per-collection changed-document counts
    pub metadata: BTreeMap<String, u64>,
}

/// Builds and parses compressed snapshot archives
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    compression: Compression,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
        }
    }
}

impl ArchiveBuilder {
    /// Builder with an explicit gzip level
    pub fn with_level(level: u32) -> Self {
        Self {
            compression: Compression::new(level),
        }
    }

    /// Serialize and compress a full export
    pub fn build_full_archive(
        &self,
        export: &FullExport,
    ) -> RecoveryResult<(Vec<u8>, BackupMetadata)> {
        let mut lines = Vec::with_capacity(export.total_documents as usize);
        for (collection, documents) in &export.collections {
            for document in documents {
                lines.push(serde_json::to_string(&ArchiveLine::from_document(
                    collection, document,
                ))?);
            }
        }

        let serialized = lines.join("\n");
        let compressed = self.compress(serialized.as_bytes())?;
        let metadata = build_metadata(
            export.collection_counts(),
            serialized.len() as u64,
            &compressed,
        );

        debug!(
            documents = export.total_documents,
            uncompressed = metadata.uncompressed_bytes,
            compressed = metadata.compressed_bytes,
            ratio_pct = metadata.compression_ratio_pct,
            "built full archive"
        );
        Ok((compressed, metadata))
    }

    /// Serialize and compress a changeset, embedding the parent linkage
    pub fn build_incremental_archive(
        &self,
        changeset: &ChangeSet,
        backup_id: &str,
        parent_backup_id: &str,
        parent_content_handle: &str,
    ) -> RecoveryResult<(Vec<u8>, BackupMetadata)> {
        let counts: BTreeMap<String, u64> = changeset
            .collections
            .iter()
            .map(|(name, changes)| (name.clone(), changes.total()))
            .collect();

        let payload = IncrementalPayload {
            backup_id: backup_id.to_string(),
            backup_type: BackupType::Incremental,
            timestamp: Utc::now(),
            parent_backup: parent_backup_id.to_string(),
            parent_cid: parent_content_handle.to_string(),
            changes: changeset.collections.clone(),
            metadata: counts.clone(),
        };

        let serialized = serde_json::to_vec(&payload)?;
        let compressed = self.compress(&serialized)?;
        let metadata = build_metadata(counts, serialized.len() as u64, &compressed);

        debug!(
            backup_id,
            parent_backup_id,
            changes = metadata.total_documents,
            "built incremental archive"
        );
        Ok((compressed, metadata))
    }

    /// Decompress and parse a FULL archive back into per-collection documents
    pub fn parse_full_archive(
        &self,
        bytes: &[u8],
    ) -> RecoveryResult<BTreeMap<String, Vec<Document>>> {
        let serialized = self.decompress(bytes)?;
        let text = String::from_utf8(serialized).map_err(|err| {
            RecoveryError::IntegrityFailure {
                details: format!("full archive is not valid UTF-8: {err}"),
            }
        })?;

        let mut collections: BTreeMap<String, Vec<Document>> = BTreeMap::new();
        for (index, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let parsed: ArchiveLine =
                serde_json::from_str(line).map_err(|err| RecoveryError::IntegrityFailure {
                    details: format!("malformed archive line {}: {err}", index + 1),
                })?;
            collections
                .entry(parsed.record_type.clone())
                .or_default()
                .push(parsed.into_document());
        }
        Ok(collections)
    }

    /// Decompress and parse an INCREMENTAL archive
    pub fn parse_incremental_archive(&self, bytes: &[u8]) -> RecoveryResult<IncrementalPayload> {
        let serialized = self.decompress(bytes)?;
        serde_json::from_slice(&serialized).map_err(|err| RecoveryError::IntegrityFailure {
            details: format!("malformed incremental payload: {err}"),
        })
    }

    fn compress(&self, bytes: &[u8]) -> RecoveryResult<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), self.compression);
        encoder.write_all(bytes)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&self, bytes: &[u8]) -> RecoveryResult<Vec<u8>> {
        let mut decoder = GzDecoder::new(bytes);
        let mut output = Vec::new();
        decoder
            .read_to_end(&mut output)
            .map_err(|err| RecoveryError::IntegrityFailure {
                details: format!("payload decompression failed: {err}"),
            })?;
        Ok(output)
    }
}

/// Verify a downloaded payload against its recorded checksum
pub fn verify_checksum(bytes: &[u8], expected: &str) -> RecoveryResult<()> {
    if expected.is_empty() {
        return Ok(());
    }
    let actual = hex::encode(Sha256::digest(bytes));
    if actual != expected {
        return Err(RecoveryError::IntegrityFailure {
            details: format!("payload checksum mismatch: expected {expected}, got {actual}"),
        });
    }
    Ok(())
}

fn build_metadata(
    collection_counts: BTreeMap<String, u64>,
    uncompressed_bytes: u64,
    compressed: &[u8],
) -> BackupMetadata {
    let total_documents = collection_counts.values().sum();
    BackupMetadata {
        collection_counts,
        total_documents,
        uncompressed_bytes,
        compressed_bytes: compressed.len() as u64,
        compression_ratio_pct: compression_ratio_pct(uncompressed_bytes, compressed.len() as u64),
        checksum: hex::encode(Sha256::digest(compressed)),
    }
}

/// Percentage reduction achieved by compression, rounded to one decimal
fn compression_ratio_pct(uncompressed: u64, compressed: u64) -> f64 {
    if uncompressed == 0 {
        return 0.0;
    }
    let reduction = 1.0 - compressed as f64 / uncompressed as f64;
    (reduction * 1000.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc(id: &str, collection_hint: &str) -> Document {
        let at = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap();
        Document {
            id: id.to_string(),
            owner_id: Some(format!("owner-{id}")),
            customer_id: None,
            seller_id: Some("seller-9".to_string()),
            created_at: at,
            updated_at: at,
            data: serde_json::json!({ "collection": collection_hint, "id": id }),
        }
    }

    fn export_with(counts: &[(&str, usize)]) -> FullExport {
        let mut collections = BTreeMap::new();
        let mut total = 0u64;
        for (name, count) in counts {
            let docs: Vec<Document> = (0..*count)
                .map(|i| doc(&format!("{name}-{i}"), name))
                .collect();
            total += docs.len() as u64;
            collections.insert(name.to_string(), docs);
        }
        FullExport {
            collections,
            total_documents: total,
        }
    }

    #[test]
    fn test_full_archive_round_trip_preserves_every_record() {
        let builder = ArchiveBuilder::default();
        let export = export_with(&[("orders", 10), ("products", 0), ("users", 5)]);

        let (bytes, metadata) = builder.build_full_archive(&export).unwrap();
        assert_eq!(metadata.total_documents, 15);
        assert_eq!(metadata.collection_counts["orders"], 10);
        assert_eq!(metadata.collection_counts["products"], 0);
        assert_eq!(metadata.collection_counts["users"], 5);

        let parsed = builder.parse_full_archive(&bytes).unwrap();
        let restored: usize = parsed.values().map(Vec::len).sum();
        assert_eq!(restored, 15);
        assert_eq!(parsed["orders"].len(), 10);
        assert_eq!(parsed["users"][0].seller_id.as_deref(), Some("seller-9"));
    }

    #[test]
    fn test_full_archive_line_wire_format() {
        let builder = ArchiveBuilder::default();
        let export = export_with(&[("orders", 1)]);
        let (bytes, _) = builder.build_full_archive(&export).unwrap();

        let mut decoder = GzDecoder::new(bytes.as_slice());
        let mut text = String::new();
        decoder.read_to_string(&mut text).unwrap();

        let line: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(line["type"], "orders");
        assert_eq!(line["id"], "orders-0");
        assert_eq!(line["ownerId"], "owner-orders-0");
        assert!(line.get("customerId").is_none());
    }

    #[test]
    fn test_incremental_archive_embeds_parent_linkage() {
        let builder = ArchiveBuilder::default();
        let mut collections = BTreeMap::new();
        collections.insert(
            "orders".to_string(),
            CollectionChanges {
                created: vec![doc("o-new", "orders")],
                updated: vec![doc("o-changed", "orders")],
                deleted: vec![],
            },
        );
        let changeset = ChangeSet {
            since: Utc::now(),
            collections,
        };

        let (bytes, metadata) = builder
            .build_incremental_archive(&changeset, "incr-1", "full-0", "bafy-full-0")
            .unwrap();
        assert_eq!(metadata.total_documents, 2);

        let payload = builder.parse_incremental_archive(&bytes).unwrap();
        assert_eq!(payload.backup_id, "incr-1");
        assert_eq!(payload.parent_backup, "full-0");
        assert_eq!(payload.parent_cid, "bafy-full-0");
        assert_eq!(payload.backup_type, BackupType::Incremental);
        assert_eq!(payload.changes["orders"].created.len(), 1);
        assert_eq!(payload.metadata["orders"], 2);
    }

    #[test]
    fn test_malformed_payload_is_an_integrity_error() {
        let builder = ArchiveBuilder::default();
        let err = builder.parse_full_archive(b"not gzip at all").unwrap_err();
        assert!(matches!(err, RecoveryError::IntegrityFailure { .. }));

        let err = builder
            .parse_incremental_archive(b"also not gzip")
            .unwrap_err();
        assert!(matches!(err, RecoveryError::IntegrityFailure { .. }));
    }

    #[test]
    fn test_checksum_verification() {
        let bytes = b"payload";
        let good = hex::encode(Sha256::digest(bytes));
        assert!(verify_checksum(bytes, &good).is_ok());
        assert!(verify_checksum(bytes, "deadbeef").is_err());
        // Legacy records without a checksum are accepted
        assert!(verify_checksum(bytes, "").is_ok());
    }

    #[test]
    fn test_compression_ratio_rounding() {
        assert_eq!(compression_ratio_pct(1000, 250), 75.0);
        assert_eq!(compression_ratio_pct(3, 1), 66.7);
        assert_eq!(compression_ratio_pct(0, 0), 0.0);
    }
}
