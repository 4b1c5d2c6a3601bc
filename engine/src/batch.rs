//! Batch protocol types.
//!
//! A batch request is an ordered array of operations against one bucket.
//! The remote store answers with a results array of the same length; result
//! `i` belongs to operation `i`. Nothing else correlates the two.

use crate::{ConflictReason, DocumentId, Error, Etag, LocalDocument, Result, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Insert a new document. The client-chosen id is embedded in `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertOp {
    /// Full document payload
    pub data: Value,
}

/// Replace a document wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOp {
    pub id: DocumentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<Etag>,
    /// Full replacement payload
    pub data: Value,
}

/// Delete a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteOp {
    pub id: DocumentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<Etag>,
}

/// One entry of a batch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum BatchOperation {
    Insert(InsertOp),
    Update(UpdateOp),
    Delete(DeleteOp),
}

/// Operation kind without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Insert,
    Update,
    Delete,
}

impl BatchOperation {
    /// Derive the operation that pushes a dirty document.
    ///
    /// Deleted documents become deletes, never-synced documents become inserts,
    /// everything else an update.
    pub fn for_document(doc: &LocalDocument) -> Result<Self> {
        let id = doc.id.clone().ok_or_else(|| {
            Error::InvalidDocument(format!("dirty document in {} has no id", doc.bucket))
        })?;

        let op = if doc.deleted {
            BatchOperation::Delete(DeleteOp {
                id,
                etag: doc.etag.clone(),
            })
        } else if !doc.has_synced() {
            BatchOperation::Insert(InsertOp {
                data: doc.to_payload(),
            })
        } else {
            BatchOperation::Update(UpdateOp {
                id,
                etag: doc.etag.clone(),
                data: doc.to_payload(),
            })
        };
        Ok(op)
    }

    /// Get the operation kind.
    pub fn kind(&self) -> OpKind {
        match self {
            BatchOperation::Insert(_) => OpKind::Insert,
            BatchOperation::Update(_) => OpKind::Update,
            BatchOperation::Delete(_) => OpKind::Delete,
        }
    }

    /// The document id this operation targets.
    ///
    /// Inserts carry it inside their payload.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            BatchOperation::Insert(op) => op.data.get("id").and_then(Value::as_str),
            BatchOperation::Update(op) => Some(&op.id),
            BatchOperation::Delete(op) => Some(&op.id),
        }
    }
}

/// A multi-operation request for one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    /// Scopes the request for idempotent replay on the server
    pub request_token: String,
    /// Soft (mark) deletes when true, hard deletes otherwise
    pub delete_mark: bool,
    pub requests: Vec<BatchOperation>,
}

impl BatchRequest {
    /// Create a request with a fresh request token.
    pub fn new(requests: Vec<BatchOperation>, delete_mark: bool) -> Self {
        Self {
            request_token: uuid::Uuid::new_v4().to_string(),
            delete_mark,
            requests,
        }
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Check if the request carries no operations.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Per-operation outcome reported by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Ok,
    Conflict,
    NotFound,
    Forbidden,
    BadRequest,
    ServerError,
    #[serde(other)]
    Unknown,
}

/// Result entry, positionally matched with its operation.
///
/// Every field but `result` is optional: a rejected insert never got an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub result: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ConflictReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DocumentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<Etag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Server copy of the document, echoed on conflicts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl BatchResult {
    /// A bare result with only an outcome.
    pub fn status(result: Outcome) -> Self {
        Self {
            result,
            reason: None,
            id: None,
            etag: None,
            updated_at: None,
            data: None,
        }
    }

    /// An accepted write.
    pub fn ok(
        id: impl Into<DocumentId>,
        etag: impl Into<Etag>,
        updated_at: impl Into<Timestamp>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            etag: Some(etag.into()),
            updated_at: Some(updated_at.into()),
            ..Self::status(Outcome::Ok)
        }
    }

    /// A conflict, optionally echoing the server's copy.
    pub fn conflict(reason: ConflictReason, data: Option<Value>) -> Self {
        let etag = data
            .as_ref()
            .and_then(|d| d.get("etag"))
            .and_then(Value::as_str)
            .map(String::from);
        let updated_at = data
            .as_ref()
            .and_then(|d| d.get("updatedAt"))
            .and_then(Value::as_str)
            .map(String::from);
        let id = data
            .as_ref()
            .and_then(|d| d.get("id"))
            .and_then(Value::as_str)
            .map(String::from);
        Self {
            reason: Some(reason),
            id,
            etag,
            updated_at,
            data,
            ..Self::status(Outcome::Conflict)
        }
    }
}

/// Results of a batch request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<BatchResult>,
}

impl BatchResponse {
    /// Pair every operation with its result.
    ///
    /// A length mismatch breaks positional correlation and is a protocol fault.
    pub fn correlate(
        self,
        requests: Vec<BatchOperation>,
    ) -> Result<Vec<(BatchOperation, BatchResult)>> {
        if self.results.len() != requests.len() {
            return Err(Error::Protocol(format!(
                "batch sent {} operations but received {} results",
                requests.len(),
                self.results.len()
            )));
        }
        Ok(requests.into_iter().zip(self.results).collect())
    }
}
