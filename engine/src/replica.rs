//! The local replica: where documents live while offline.
//!
//! [`ReplicaStore`] is the contract the engine needs from whatever database
//! backs the replica. Every call is atomic; no partial write is ever visible.
//! [`MemoryReplicaStore`] is the reference implementation.

use crate::{
    error::Result, BucketName, DocumentId, Error, LocalDocument, ReplicaSnapshot, SyncState,
    Timestamp,
};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Format an instant as a checkpoint: UTC ISO-8601 with milliseconds.
pub fn checkpoint_timestamp(at: DateTime<Utc>) -> Timestamp {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Persistent local document store with sync-state tagging.
pub trait ReplicaStore: Send + Sync {
    /// Store a new document under its bucket and id, tagged with `state`.
    fn insert_object(&self, doc: &LocalDocument, state: SyncState) -> Result<()>;

    /// Replace an existing document, tagged with `state`.
    fn update_object(&self, doc: &LocalDocument, state: SyncState) -> Result<()>;

    /// Remove a document.
    fn delete_object(&self, doc: &LocalDocument) -> Result<()>;

    /// Look up a document.
    fn find_object(&self, bucket: &str, id: &str) -> Result<Option<LocalDocument>>;

    /// Ids of all dirty documents in a bucket, in local insertion order.
    fn query_dirty_object_ids(&self, bucket: &str) -> Result<Vec<DocumentId>>;

    /// Resolve ids to documents, in the order given. Missing ids are skipped.
    fn query_objects_with_ids(&self, bucket: &str, ids: &[DocumentId])
        -> Result<Vec<LocalDocument>>;

    /// When the bucket last completed a clean sync round.
    fn last_synced_at(&self, bucket: &str) -> Result<Option<Timestamp>>;

    /// Advance the bucket's checkpoint.
    fn set_last_synced_at(&self, bucket: &str, at: &str) -> Result<()>;
}

fn require_id(doc: &LocalDocument) -> Result<&DocumentId> {
    doc.id
        .as_ref()
        .ok_or_else(|| Error::InvalidDocument(format!("document in {} has no id", doc.bucket)))
}

#[derive(Debug, Clone)]
struct Entry {
    /// Insertion sequence, for stable dirty ordering
    seq: u64,
    doc: LocalDocument,
}

#[derive(Debug, Default)]
struct Inner {
    buckets: HashMap<BucketName, HashMap<DocumentId, Entry>>,
    checkpoints: BTreeMap<BucketName, Timestamp>,
    next_seq: u64,
}

/// An in-memory [`ReplicaStore`].
#[derive(Debug, Default)]
pub struct MemoryReplicaStore {
    inner: RwLock<Inner>,
}

impl MemoryReplicaStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding a snapshot's contents.
    pub fn from_snapshot(snapshot: ReplicaSnapshot) -> Result<Self> {
        let store = Self::new();
        store.import_snapshot(snapshot)?;
        Ok(store)
    }

    /// All documents of a bucket, in insertion order.
    pub fn documents(&self, bucket: &str) -> Vec<LocalDocument> {
        let inner = self.inner.read();
        let Some(docs) = inner.buckets.get(bucket) else {
            return Vec::new();
        };
        let mut entries: Vec<&Entry> = docs.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.doc.clone()).collect()
    }

    /// Count dirty documents in a bucket.
    pub fn dirty_count(&self, bucket: &str) -> usize {
        self.inner
            .read()
            .buckets
            .get(bucket)
            .map(|docs| docs.values().filter(|e| e.doc.is_dirty()).count())
            .unwrap_or(0)
    }

    /// Export the whole replica.
    pub fn export_snapshot(&self) -> Result<ReplicaSnapshot> {
        let inner = self.inner.read();
        let mut snapshot = ReplicaSnapshot::new();
        for docs in inner.buckets.values() {
            let mut entries: Vec<&Entry> = docs.values().collect();
            entries.sort_by_key(|entry| entry.seq);
            for entry in entries {
                snapshot.add_document(entry.doc.clone())?;
            }
        }
        snapshot.checkpoints = inner.checkpoints.clone();
        Ok(snapshot)
    }

    /// Replace the replica's contents with a snapshot.
    ///
    /// Insertion order follows the snapshot's `order`, so dirty documents
    /// push in the same order they would have before the export.
    pub fn import_snapshot(&self, snapshot: ReplicaSnapshot) -> Result<()> {
        snapshot.validate()?;
        let sequences: Vec<(BucketName, Vec<DocumentId>)> = snapshot
            .buckets
            .keys()
            .map(|bucket| (bucket.clone(), snapshot.ordered_ids(bucket)))
            .collect();
        let mut buckets = snapshot.buckets;

        let mut inner = self.inner.write();
        inner.buckets.clear();
        inner.checkpoints = snapshot.checkpoints;
        for (bucket, ids) in sequences {
            let Some(mut docs) = buckets.remove(&bucket) else {
                continue;
            };
            for id in ids {
                let Some(doc) = docs.remove(&id) else {
                    continue;
                };
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner
                    .buckets
                    .entry(bucket.clone())
                    .or_default()
                    .insert(id, Entry { seq, doc });
            }
        }
        Ok(())
    }
}

impl ReplicaStore for MemoryReplicaStore {
    fn insert_object(&self, doc: &LocalDocument, state: SyncState) -> Result<()> {
        let id = require_id(doc)?;
        let mut inner = self.inner.write();
        let seq = inner.next_seq;
        let docs = inner.buckets.entry(doc.bucket.clone()).or_default();
        if docs.contains_key(id) {
            return Err(Error::AlreadyExists {
                bucket: doc.bucket.clone(),
                id: id.clone(),
            });
        }

        let mut stored = doc.clone();
        stored.sync_state = state;
        docs.insert(id.clone(), Entry { seq, doc: stored });
        inner.next_seq += 1;
        Ok(())
    }

    fn update_object(&self, doc: &LocalDocument, state: SyncState) -> Result<()> {
        let id = require_id(doc)?;
        let mut inner = self.inner.write();
        let entry = inner
            .buckets
            .get_mut(&doc.bucket)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| Error::NotFound {
                bucket: doc.bucket.clone(),
                id: id.clone(),
            })?;

        entry.doc = doc.clone();
        entry.doc.sync_state = state;
        Ok(())
    }

    fn delete_object(&self, doc: &LocalDocument) -> Result<()> {
        let id = require_id(doc)?;
        let mut inner = self.inner.write();
        inner
            .buckets
            .get_mut(&doc.bucket)
            .and_then(|docs| docs.remove(id))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound {
                bucket: doc.bucket.clone(),
                id: id.clone(),
            })
    }

    fn find_object(&self, bucket: &str, id: &str) -> Result<Option<LocalDocument>> {
        Ok(self
            .inner
            .read()
            .buckets
            .get(bucket)
            .and_then(|docs| docs.get(id))
            .map(|e| e.doc.clone()))
    }

    fn query_dirty_object_ids(&self, bucket: &str) -> Result<Vec<DocumentId>> {
        let inner = self.inner.read();
        let Some(docs) = inner.buckets.get(bucket) else {
            return Ok(Vec::new());
        };
        let mut dirty: Vec<(u64, &DocumentId)> = docs
            .iter()
            .filter(|(_, e)| e.doc.is_dirty())
            .map(|(id, e)| (e.seq, id))
            .collect();
        dirty.sort_by_key(|(seq, _)| *seq);
        Ok(dirty.into_iter().map(|(_, id)| id.clone()).collect())
    }

    fn query_objects_with_ids(
        &self,
        bucket: &str,
        ids: &[DocumentId],
    ) -> Result<Vec<LocalDocument>> {
        let inner = self.inner.read();
        let Some(docs) = inner.buckets.get(bucket) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| docs.get(id))
            .map(|e| e.doc.clone())
            .collect())
    }

    fn last_synced_at(&self, bucket: &str) -> Result<Option<Timestamp>> {
        Ok(self.inner.read().checkpoints.get(bucket).cloned())
    }

    fn set_last_synced_at(&self, bucket: &str, at: &str) -> Result<()> {
        self.inner
            .write()
            .checkpoints
            .insert(bucket.to_string(), at.to_string());
        Ok(())
    }
}
