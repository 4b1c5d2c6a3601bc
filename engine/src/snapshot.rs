//! Snapshots of the in-memory replica.
//!
//! [`MemoryReplicaStore`](crate::MemoryReplicaStore) keeps everything in memory;
//! snapshots are how an embedding application persists it between runs.
//! BTreeMaps keep serialization deterministic. Local insertion order, which
//! decides the order dirty documents are pushed in, travels in `order`.

use crate::{error::Result, BucketName, DocumentId, Error, LocalDocument, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of the local replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Documents by bucket, then by id
    pub buckets: BTreeMap<BucketName, BTreeMap<DocumentId, LocalDocument>>,
    /// Document ids per bucket in local insertion order
    #[serde(default)]
    pub order: BTreeMap<BucketName, Vec<DocumentId>>,
    /// Last-synchronized checkpoint per bucket
    pub checkpoints: BTreeMap<BucketName, Timestamp>,
}

impl Default for ReplicaSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            buckets: BTreeMap::new(),
            order: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
        }
    }

    /// Add a document. Documents without an id cannot be stored.
    ///
    /// A new id goes to the end of its bucket's order; re-adding an id
    /// replaces the document in place.
    pub fn add_document(&mut self, doc: LocalDocument) -> Result<()> {
        let id = doc.id.clone().ok_or_else(|| {
            Error::InvalidSnapshot(format!("document in {} has no id", doc.bucket))
        })?;
        let bucket = doc.bucket.clone();
        let replaced = self
            .buckets
            .entry(bucket.clone())
            .or_default()
            .insert(id.clone(), doc);
        if replaced.is_none() {
            self.order.entry(bucket).or_default().push(id);
        }
        Ok(())
    }

    /// Ids of a bucket in insertion order.
    ///
    /// Documents missing from `order` follow in id order.
    pub fn ordered_ids(&self, bucket: &str) -> Vec<DocumentId> {
        let Some(docs) = self.buckets.get(bucket) else {
            return Vec::new();
        };
        let listed = self.order.get(bucket).map(Vec::as_slice).unwrap_or_default();
        let known: BTreeSet<&DocumentId> = listed.iter().collect();
        let mut ids = listed.to_vec();
        ids.extend(docs.keys().filter(|id| !known.contains(id)).cloned());
        ids
    }

    /// Get a document from the snapshot.
    pub fn get_document(&self, bucket: &str, id: &str) -> Option<&LocalDocument> {
        self.buckets.get(bucket)?.get(id)
    }

    /// Count documents across all buckets.
    pub fn document_count(&self) -> usize {
        self.buckets.values().map(|b| b.len()).sum()
    }

    /// Count documents with unpushed changes.
    pub fn dirty_count(&self) -> usize {
        self.buckets
            .values()
            .flat_map(|b| b.values())
            .filter(|d| d.is_dirty())
            .count()
    }

    /// Check that every document sits under its own bucket and id.
    pub fn validate(&self) -> Result<()> {
        for (bucket, docs) in &self.buckets {
            for (id, doc) in docs {
                if &doc.bucket != bucket || doc.id.as_ref() != Some(id) {
                    return Err(Error::InvalidSnapshot(format!(
                        "document filed under {bucket}/{id} claims {}/{}",
                        doc.bucket,
                        doc.id.as_deref().unwrap_or("<none>")
                    )));
                }
            }
        }

        for (bucket, ids) in &self.order {
            let docs = self.buckets.get(bucket);
            let mut seen = BTreeSet::new();
            for id in ids {
                if !docs.is_some_and(|docs| docs.contains_key(id)) {
                    return Err(Error::InvalidSnapshot(format!(
                        "order lists {bucket}/{id} but no such document"
                    )));
                }
                if !seen.insert(id) {
                    return Err(Error::InvalidSnapshot(format!(
                        "order lists {bucket}/{id} twice"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        snapshot.validate()?;
        Ok(snapshot)
    }
}
