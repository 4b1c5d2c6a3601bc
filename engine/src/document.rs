//! Local document types.

use crate::{Acl, BucketName, DocumentId, Error, Etag, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys with engine meaning inside a wire document; everything else is user data.
pub const RESERVED_KEYS: [&str; 6] = ["id", "etag", "createdAt", "updatedAt", "acl", "deleted"];

/// Whether a local document matches the last-known server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Matches the server as of the last reconciliation
    Sync,
    /// Has local mutations not yet pushed
    Dirty,
}

/// A document in the local replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDocument {
    /// Bucket (collection) this document belongs to
    pub bucket: BucketName,
    /// Assigned on first save, never changed afterwards
    pub id: Option<DocumentId>,
    /// Version token from the server, absent until the first accepted push
    pub etag: Option<Etag>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
    /// Access control, absent means the caller never set one
    pub acl: Option<Acl>,
    /// Soft delete flag (tombstone)
    pub deleted: bool,
    /// The server has stored this document at least once
    #[serde(default)]
    pub acknowledged: bool,
    pub sync_state: SyncState,
    /// User payload
    pub fields: Map<String, Value>,
}

impl LocalDocument {
    /// Create an unsaved document in `bucket`.
    pub fn new(bucket: impl Into<BucketName>) -> Self {
        Self {
            bucket: bucket.into(),
            id: None,
            etag: None,
            created_at: None,
            updated_at: None,
            acl: None,
            deleted: false,
            acknowledged: false,
            sync_state: SyncState::Dirty,
            fields: Map::new(),
        }
    }

    /// Set the id.
    pub fn with_id(mut self, id: impl Into<DocumentId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the etag.
    pub fn with_etag(mut self, etag: impl Into<Etag>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Set the ACL.
    pub fn with_acl(mut self, acl: Acl) -> Self {
        self.acl = Some(acl);
        self
    }

    /// Set a user field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set(key, value);
        self
    }

    /// Set a user field.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Get a user field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Whether this document has unpushed changes.
    pub fn is_dirty(&self) -> bool {
        self.sync_state == SyncState::Dirty
    }

    /// Whether the server has accepted this document at least once.
    ///
    /// An etag implies it; an acknowledgement without one counts as well.
    pub fn has_synced(&self) -> bool {
        self.acknowledged || self.etag.is_some()
    }

    /// Full-document payload sent on insert and update.
    pub fn to_payload(&self) -> Value {
        let mut payload = self.fields.clone();
        if let Some(id) = &self.id {
            payload.insert("id".into(), Value::String(id.clone()));
        }
        if let Some(acl) = &self.acl {
            if let Ok(value) = serde_json::to_value(acl) {
                payload.insert("acl".into(), value);
            }
        }
        Value::Object(payload)
    }

    /// Build a synced document from a server representation.
    pub fn from_server(bucket: impl Into<BucketName>, data: &Value) -> Result<Self, Error> {
        let mut doc = Self::new(bucket);
        doc.overwrite_from_server(data)?;
        doc.sync_state = SyncState::Sync;
        Ok(doc)
    }

    /// Replace fields and server metadata with a server representation.
    ///
    /// An existing id is never replaced. User fields absent from `data` are dropped.
    pub fn overwrite_from_server(&mut self, data: &Value) -> Result<(), Error> {
        let object = data.as_object().ok_or_else(|| {
            Error::InvalidDocument(format!("server document is not an object: {data}"))
        })?;

        if self.id.is_none() {
            self.id = object.get("id").and_then(Value::as_str).map(String::from);
        }
        if let Some(etag) = object.get("etag").and_then(Value::as_str) {
            self.etag = Some(etag.to_string());
        }
        if let Some(created_at) = object.get("createdAt").and_then(Value::as_str) {
            self.created_at = Some(created_at.to_string());
        }
        if let Some(updated_at) = object.get("updatedAt").and_then(Value::as_str) {
            self.updated_at = Some(updated_at.to_string());
        }
        if let Some(acl) = object.get("acl") {
            self.acl = if acl.is_null() {
                None
            } else {
                Some(serde_json::from_value(acl.clone())?)
            };
        }
        self.deleted = object
            .get("deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.acknowledged = true;

        self.fields = object
            .iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(())
    }

    /// Adopt the server's acknowledgement of an accepted write.
    ///
    /// Returns false when the server reported an id different from the local one;
    /// the local id is kept in that case.
    pub fn adopt_ack(
        &mut self,
        id: Option<&str>,
        etag: Option<&str>,
        updated_at: Option<&str>,
    ) -> bool {
        let mut id_matches = true;
        match (&self.id, id) {
            (None, Some(server_id)) => self.id = Some(server_id.to_string()),
            (Some(local_id), Some(server_id)) if local_id != server_id => id_matches = false,
            _ => {}
        }
        if let Some(etag) = etag {
            self.etag = Some(etag.to_string());
        }
        if let Some(updated_at) = updated_at {
            if self.created_at.is_none() {
                self.created_at = Some(updated_at.to_string());
            }
            self.updated_at = Some(updated_at.to_string());
        }
        self.acknowledged = true;
        self.sync_state = SyncState::Sync;
        id_matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_document_is_dirty_and_unsaved() {
        let doc = LocalDocument::new("notes").with_field("title", json!("hello"));
        assert_eq!(doc.bucket, "notes");
        assert!(doc.id.is_none());
        assert!(doc.is_dirty());
        assert!(!doc.has_synced());
        assert_eq!(doc.get("title"), Some(&json!("hello")));
    }

    #[test]
    fn payload_embeds_id_and_acl() {
        let doc = LocalDocument::new("notes")
            .with_id("n1")
            .with_etag("e1")
            .with_acl(Acl::owned_by("u1"))
            .with_field("title", json!("hello"));

        let payload = doc.to_payload();
        assert_eq!(payload["id"], "n1");
        assert_eq!(payload["title"], "hello");
        assert_eq!(payload["acl"]["owner"], "u1");
        assert!(payload.get("etag").is_none());
    }

    #[test]
    fn overwrite_from_server_replaces_fields() {
        let mut doc = LocalDocument::new("notes")
            .with_id("n1")
            .with_etag("abc")
            .with_field("title", json!("local"))
            .with_field("draft", json!(true));

        doc.overwrite_from_server(&json!({
            "id": "n1",
            "etag": "xyz",
            "updatedAt": "2024-02-01T00:00:00.000Z",
            "title": "server"
        }))
        .unwrap();

        assert_eq!(doc.etag.as_deref(), Some("xyz"));
        assert_eq!(doc.updated_at.as_deref(), Some("2024-02-01T00:00:00.000Z"));
        assert_eq!(doc.get("title"), Some(&json!("server")));
        assert_eq!(doc.get("draft"), None);
        assert!(!doc.fields.contains_key("etag"));
    }

    #[test]
    fn overwrite_keeps_existing_id() {
        let mut doc = LocalDocument::new("notes").with_id("n1");
        doc.overwrite_from_server(&json!({"id": "other"})).unwrap();
        assert_eq!(doc.id.as_deref(), Some("n1"));
    }

    #[test]
    fn overwrite_rejects_non_object() {
        let mut doc = LocalDocument::new("notes");
        let err = doc.overwrite_from_server(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(_)));
    }

    #[test]
    fn adopt_ack_marks_sync() {
        let mut doc = LocalDocument::new("notes").with_id("n1");
        assert!(doc.adopt_ack(Some("n1"), Some("e1"), Some("2024-01-01T00:00:00.000Z")));
        assert_eq!(doc.sync_state, SyncState::Sync);
        assert_eq!(doc.etag.as_deref(), Some("e1"));
        assert_eq!(doc.created_at.as_deref(), Some("2024-01-01T00:00:00.000Z"));

        assert!(!doc.adopt_ack(Some("n2"), Some("e2"), None));
        assert_eq!(doc.id.as_deref(), Some("n1"));
        assert_eq!(doc.etag.as_deref(), Some("e2"));
    }

    #[test]
    fn ack_without_etag_still_counts_as_synced() {
        let mut doc = LocalDocument::new("notes").with_id("n1");
        doc.adopt_ack(Some("n1"), None, None);
        assert!(doc.etag.is_none());
        assert!(doc.has_synced());

        let pulled = LocalDocument::from_server("notes", &json!({"id": "n2"})).unwrap();
        assert!(pulled.has_synced());
    }

    #[test]
    fn acknowledged_defaults_to_false_when_absent() {
        let doc: LocalDocument = serde_json::from_value(json!({
            "bucket": "notes",
            "id": "n1",
            "etag": null,
            "createdAt": null,
            "updatedAt": null,
            "acl": null,
            "deleted": false,
            "syncState": "dirty",
            "fields": {}
        }))
        .unwrap();
        assert!(!doc.acknowledged);
        assert!(!doc.has_synced());
    }

    #[test]
    fn from_server_parses_tombstone() {
        let doc =
            LocalDocument::from_server("notes", &json!({"id": "n1", "deleted": true})).unwrap();
        assert!(doc.deleted);
        assert_eq!(doc.sync_state, SyncState::Sync);
    }
}
