//! Windowed push of dirty documents.
//!
//! A push round reads the bucket's dirty documents, splits them into windows
//! of `push_divide_number` and sends one batch request per window. At most one
//! window is in flight: the request for window k+1 is built while window k is
//! exchanged and reconciled, then window k is awaited before k+1 goes out.
//!
//! The bucket checkpoint only advances when the whole round finished without
//! a single failed item.
//!
//! Each window unit holds the round's sync section. If the `push` future is
//! dropped mid-round, the in-flight unit still finishes its exchange and
//! reconciliation, and gated mutations stay locked out until it has.

use crate::{
    error::Result, reconcile::reconcile_window, replica::checkpoint_timestamp, BatchOperation,
    BatchRequest, BatchTransport, ConflictResolver, FailedItem, LocalDocument, ReplicaStore,
    SyncConfig, SyncCoordinator, SyncGuard,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

type WindowUnit = JoinHandle<Result<Vec<FailedItem>>>;

/// Split `items` into order-preserving windows of at most `size` items.
pub fn partition<T>(items: &[T], size: usize) -> Vec<&[T]> {
    items.chunks(size.max(1)).collect()
}

/// Build the batch request for one window.
pub fn build_request(window: &[LocalDocument], delete_mark: bool) -> Result<BatchRequest> {
    let requests = window
        .iter()
        .map(BatchOperation::for_document)
        .collect::<Result<Vec<_>>>()?;
    Ok(BatchRequest::new(requests, delete_mark))
}

/// Pushes local changes to the remote store.
pub struct PushSynchronizer<S: ReplicaStore, T: BatchTransport> {
    store: Arc<S>,
    transport: Arc<T>,
    coordinator: Arc<SyncCoordinator>,
    config: SyncConfig,
}

impl<S, T> PushSynchronizer<S, T>
where
    S: ReplicaStore + 'static,
    T: BatchTransport + 'static,
{
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

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one push round for `bucket`.
    ///
    /// Returns every item that did not land, across all windows. Transport and
    /// protocol faults abort the round; windows already reconciled keep their
    /// local changes and the checkpoint is left alone.
    pub async fn push<R>(&self, bucket: &str, resolver: R) -> Result<Vec<FailedItem>>
    where
        R: ConflictResolver + 'static,
    {
        let round = Arc::new(self.coordinator.start_sync()?);
        let started = Instant::now();
        let resolver: Arc<dyn ConflictResolver> = Arc::new(resolver);

        let ids = self.store.query_dirty_object_ids(bucket)?;
        let documents = self.store.query_objects_with_ids(bucket, &ids)?;
        let windows = partition(&documents, self.config.window_size());
        tracing::debug!(
            bucket,
            dirty = documents.len(),
            windows = windows.len(),
            "Starting push round"
        );

        let mut failed = Vec::new();
        let mut in_flight: Option<WindowUnit> = None;

        for (index, window) in windows.iter().enumerate() {
            let request = build_request(window, self.config.delete_mark);

            if let Some(unit) = in_flight.take() {
                failed.extend(unit.await??);
            }

            let request = request?;
            tracing::debug!(
                bucket,
                window = index,
                size = request.len(),
                token = %request.request_token,
                "Dispatching window"
            );
            in_flight = Some(self.spawn_unit(
                bucket,
                request,
                Arc::clone(&resolver),
                Arc::clone(&round),
            ));
        }

        if let Some(unit) = in_flight.take() {
            failed.extend(unit.await??);
        }

        if failed.is_empty() {
            let checkpoint = checkpoint_timestamp(chrono::Utc::now());
            self.store.set_last_synced_at(bucket, &checkpoint)?;
            tracing::info!(
                bucket,
                pushed = documents.len(),
                checkpoint = %checkpoint,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Push round complete"
            );
        } else {
            tracing::info!(
                bucket,
                pushed = documents.len(),
                failed = failed.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Push round finished with failures, checkpoint unchanged"
            );
        }

        Ok(failed)
    }

    /// Exchange and reconcile one window in the background.
    fn spawn_unit(
        &self,
        bucket: &str,
        request: BatchRequest,
        resolver: Arc<dyn ConflictResolver>,
        round: Arc<SyncGuard>,
    ) -> WindowUnit {
        let store = Arc::clone(&self.store);
        let transport = Arc::clone(&self.transport);
        let bucket = bucket.to_string();
        let delete_mark = self.config.delete_mark;

        tokio::spawn(async move {
            let _round = round;
            let operations = request.requests.clone();
            let response = transport.send_batch(&bucket, request).await?;
            let pairs = response.correlate(operations)?;
            let failed =
                reconcile_window(store.as_ref(), &bucket, pairs, resolver.as_ref(), delete_mark)?;
            tracing::debug!(bucket = %bucket, failed = failed.len(), "Window reconciled");
            Ok(failed)
        })
    }
}
