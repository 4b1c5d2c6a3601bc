//! Per-item reconciliation of batch results.
//!
//! Each (operation, result) pair of a window is applied to the local replica
//! according to this table:
//!
//! | Operation     | Outcome                                        | Local action                          | Failure? |
//! |---------------|------------------------------------------------|---------------------------------------|----------|
//! | any           | Ok                                             | adopt id/etag/updatedAt, Sync         | no       |
//! | Delete        | NotFound                                       | finalize removal                      | no       |
//! | Insert/Update | NotFound                                       | none                                  | yes      |
//! | any           | Forbidden / BadRequest / ServerError / Unknown | none                                  | yes      |
//! | any           | Conflict with echo                             | resolver decides                      | resolver |
//! | any           | Conflict without echo                          | none, id recovered from the operation | yes      |
//! | any           | local document gone                            | none                                  | no       |
//!
//! A hard-delete (`deleteMark = false`) Ok removes the local copy; a soft-delete
//! Ok keeps the tombstone as Sync.

use crate::{
    error::Result, BatchOperation, BatchResult, ConflictReason, ConflictResolver, DocumentId,
    Etag, OpKind, Outcome, ReplicaStore, SyncState, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A pushed item whose intended write was not applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub op: OpKind,
    /// Document id, recovered from the request when the server omitted it
    pub id: Option<DocumentId>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ConflictReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<Etag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl FailedItem {
    fn new(op: &BatchOperation, result: BatchResult) -> Self {
        Self {
            op: op.kind(),
            id: result.id.or_else(|| op.target_id().map(String::from)),
            outcome: result.result,
            reason: result.reason,
            etag: result.etag,
            updated_at: result.updated_at,
            data: result.data,
        }
    }
}

/// Server echo with the result-level etag and updatedAt folded in.
fn echo_with_metadata(data: &Value, result: &BatchResult) -> Value {
    let mut echo = data.clone();
    if let Some(object) = echo.as_object_mut() {
        if let Some(etag) = &result.etag {
            object.insert("etag".into(), Value::String(etag.clone()));
        }
        if let Some(updated_at) = &result.updated_at {
            object.insert("updatedAt".into(), Value::String(updated_at.clone()));
        }
    }
    echo
}

/// Apply one result to the local replica.
///
/// Returns the failure entry when the item counts as failed. Store errors are
/// faults and propagate.
pub fn reconcile_item<S: ReplicaStore + ?Sized>(
    store: &S,
    bucket: &str,
    op: &BatchOperation,
    result: BatchResult,
    resolver: &dyn ConflictResolver,
    delete_mark: bool,
) -> Result<Option<FailedItem>> {
    let local = match op.target_id() {
        Some(id) => store.find_object(bucket, id)?,
        None => None,
    };
    let Some(mut local) = local else {
        tracing::debug!(
            bucket,
            id = ?op.target_id(),
            "Local document gone before reconciliation, skipping"
        );
        return Ok(None);
    };

    match result.result {
        Outcome::Ok => {
            if op.kind() == OpKind::Delete && !delete_mark {
                store.delete_object(&local)?;
                return Ok(None);
            }
            let id_matches = local.adopt_ack(
                result.id.as_deref(),
                result.etag.as_deref(),
                result.updated_at.as_deref(),
            );
            if !id_matches {
                tracing::warn!(
                    bucket,
                    local_id = ?local.id,
                    server_id = ?result.id,
                    "Server acknowledged under a different id, keeping local id"
                );
            }
            if result.etag.is_none() {
                tracing::warn!(bucket, id = ?local.id, "Server acknowledged without an etag");
            }
            store.update_object(&local, SyncState::Sync)?;
            Ok(None)
        }
        Outcome::NotFound => match op.kind() {
            OpKind::Delete => {
                store.delete_object(&local)?;
                Ok(None)
            }
            OpKind::Insert | OpKind::Update => Ok(Some(FailedItem::new(op, result))),
        },
        Outcome::Forbidden | Outcome::BadRequest | Outcome::ServerError | Outcome::Unknown => {
            Ok(Some(FailedItem::new(op, result)))
        }
        Outcome::Conflict => {
            let Some(data) = &result.data else {
                tracing::warn!(
                    bucket,
                    id = ?op.target_id(),
                    reason = ?result.reason,
                    "Conflict without server echo, cannot resolve"
                );
                return Ok(Some(FailedItem::new(op, result)));
            };

            let echo = echo_with_metadata(data, &result);
            let resolution = resolver.resolve(&local, &echo);
            let state = resolution.document.sync_state;
            store.update_object(&resolution.document, state)?;

            if resolution.is_failure {
                let mut failed = FailedItem::new(op, result);
                if failed.etag.is_none() {
                    failed.etag = resolution.document.etag.clone();
                }
                Ok(Some(failed))
            } else {
                Ok(None)
            }
        }
    }
}

/// Apply every result of a window, collecting failures in window order.
pub fn reconcile_window<S: ReplicaStore + ?Sized>(
    store: &S,
    bucket: &str,
    pairs: Vec<(BatchOperation, BatchResult)>,
    resolver: &dyn ConflictResolver,
    delete_mark: bool,
) -> Result<Vec<FailedItem>> {
    let mut failed = Vec::new();
    for (op, result) in pairs {
        if let Some(item) = reconcile_item(store, bucket, &op, result, resolver, delete_mark)? {
            failed.push(item);
        }
    }
    Ok(failed)
}
