//! Pull of remote changes into the local replica.
//!
//! The counterpart of [`push`](crate::push): fetch what changed on the server
//! since the bucket checkpoint and store it as Sync. Local documents with
//! unpushed changes are never overwritten; the next push resolves them.

use crate::{
    error::Result, replica::checkpoint_timestamp, BatchTransport, Error, LocalDocument,
    ReplicaStore, SyncConfig, SyncCoordinator, SyncState, Timestamp,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// What a pull changed locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullReport {
    /// Documents returned by the server
    pub fetched: usize,
    /// Documents inserted or overwritten as Sync
    pub applied: usize,
    /// Local copies removed because the server deleted them
    pub removed: usize,
    /// Remote changes ignored because the local copy is Dirty
    pub skipped_dirty: usize,
    /// The server returned a full page; pull again for the rest
    pub has_more: bool,
    /// The bucket checkpoint after this pull
    pub checkpoint: Option<Timestamp>,
}

/// Pulls remote changes for a bucket.
pub struct PullSynchronizer<S: ReplicaStore, T: BatchTransport> {
    store: Arc<S>,
    transport: Arc<T>,
    coordinator: Arc<SyncCoordinator>,
    config: SyncConfig,
}

impl<S: ReplicaStore, T: BatchTransport> PullSynchronizer<S, T> {
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        coordinator: Arc<SyncCoordinator>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            transport,
            coordinator,
            config,
        }
    }

    /// Fetch and apply remote changes for `bucket`.
    ///
    /// The checkpoint advances to the moment the pull began. When the server
    /// returns a full page it advances only to the newest `updatedAt` seen, so
    /// the next pull continues from there.
    pub async fn pull(&self, bucket: &str) -> Result<PullReport> {
        let _round = self.coordinator.start_sync()?;
        let started_at = checkpoint_timestamp(chrono::Utc::now());
        let since = self.store.last_synced_at(bucket)?;
        let limit = self.config.pull_limit.max(1);

        let remote = self
            .transport
            .fetch_since(bucket, since.as_deref(), limit)
            .await?;

        let mut report = PullReport {
            fetched: remote.len(),
            has_more: remote.len() >= limit,
            ..PullReport::default()
        };
        for data in &remote {
            self.apply_remote(bucket, data, &mut report)?;
        }

        let checkpoint = if report.has_more {
            newest_updated_at(&remote)
        } else {
            Some(started_at)
        };
        if let Some(checkpoint) = &checkpoint {
            self.store.set_last_synced_at(bucket, checkpoint)?;
        }
        report.checkpoint = checkpoint.or(since);

        tracing::info!(
            bucket,
            fetched = report.fetched,
            applied = report.applied,
            removed = report.removed,
            skipped_dirty = report.skipped_dirty,
            has_more = report.has_more,
            "Pull complete"
        );
        Ok(report)
    }

    fn apply_remote(&self, bucket: &str, data: &Value, report: &mut PullReport) -> Result<()> {
        let id = data
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol(format!("pulled document without id: {data}")))?;

        let local = self.store.find_object(bucket, id)?;
        if local.as_ref().is_some_and(LocalDocument::is_dirty) {
            tracing::debug!(bucket, id, "Local copy has unpushed changes, skipping");
            report.skipped_dirty += 1;
            return Ok(());
        }

        let remote_deleted = data.get("deleted").and_then(Value::as_bool).unwrap_or(false);
        match local {
            Some(local) if remote_deleted => {
                self.store.delete_object(&local)?;
                report.removed += 1;
            }
            None if remote_deleted => {}
            Some(mut local) => {
                local.overwrite_from_server(data)?;
                self.store.update_object(&local, SyncState::Sync)?;
                report.applied += 1;
            }
            None => {
                let doc = LocalDocument::from_server(bucket, data)?;
                self.store.insert_object(&doc, SyncState::Sync)?;
                report.applied += 1;
            }
        }
        Ok(())
    }
}

fn newest_updated_at(remote: &[Value]) -> Option<Timestamp> {
    remote
        .iter()
        .filter_map(|data| data.get("updatedAt").and_then(Value::as_str))
        .max()
        .map(String::from)
}
