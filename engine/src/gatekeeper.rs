//! Offline save and delete against the local replica.
//!
//! New documents are inserted directly. Changes to existing documents go
//! through the [`SyncCoordinator`] mutation section and are checked against
//! the cached copy: etag first, then ACL permissions. Every accepted change
//! leaves the document Dirty for the next push.

use crate::{
    error::Result, Acl, DocumentId, Error, LocalDocument, Permission, ReplicaStore, Session,
    SyncCoordinator, SyncState,
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Generate an id for a document saved for the first time.
pub fn new_document_id() -> DocumentId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Permission- and version-checked local writes.
pub struct OfflineGatekeeper<S: ReplicaStore> {
    store: Arc<S>,
    coordinator: Arc<SyncCoordinator>,
    session: Session,
}

impl<S: ReplicaStore> OfflineGatekeeper<S> {
    /// Create a gatekeeper acting as `session`.
    pub fn new(store: Arc<S>, coordinator: Arc<SyncCoordinator>, session: Session) -> Self {
        Self {
            store,
            coordinator,
            session,
        }
    }

    /// The caller identity checks are made against.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Read a live document from the local replica. Tombstones read as absent.
    pub fn find(&self, bucket: &str, id: &str) -> Result<Option<LocalDocument>> {
        Ok(self
            .store
            .find_object(bucket, id)?
            .filter(|doc| !doc.deleted))
    }

    /// Save a document locally.
    ///
    /// On success `doc` reflects what was stored: its id, cached etag and
    /// Dirty state.
    pub async fn save(&self, doc: &mut LocalDocument) -> Result<()> {
        if doc.id.is_none() {
            return self.insert(doc);
        }

        let _section = self.coordinator.enter_crud_section().await?;
        let cached = self.load_cached(doc)?;
        check_etag(doc, &cached)?;
        self.authorize(doc.acl.as_ref(), &cached, Permission::Write)?;

        let mut updated = doc.clone();
        updated.etag = cached.etag.clone();
        updated.created_at = cached.created_at.clone();
        updated.updated_at = cached.updated_at.clone();
        updated.acknowledged = cached.acknowledged;
        if updated.acl.is_none() {
            updated.acl = cached.acl.clone();
        }
        updated.deleted = false;
        updated.sync_state = SyncState::Dirty;

        self.store.update_object(&updated, SyncState::Dirty)?;
        tracing::debug!(bucket = %updated.bucket, id = ?updated.id, "Updated document offline");
        *doc = updated;
        Ok(())
    }

    /// Delete a document locally.
    ///
    /// A document the server has never seen is removed at once; otherwise it
    /// becomes a Dirty tombstone that the next push deletes remotely.
    pub async fn delete(&self, doc: &LocalDocument) -> Result<()> {
        if doc.id.is_none() {
            return Err(Error::InvalidDocument(
                "cannot delete a document that was never saved".into(),
            ));
        }

        let _section = self.coordinator.enter_crud_section().await?;
        let cached = self.load_cached(doc)?;
        check_etag(doc, &cached)?;
        self.authorize(None, &cached, Permission::Delete)?;

        if cached.has_synced() {
            let mut tombstone = cached;
            tombstone.deleted = true;
            self.store.update_object(&tombstone, SyncState::Dirty)?;
            tracing::debug!(
                bucket = %tombstone.bucket,
                id = ?tombstone.id,
                "Marked document deleted offline"
            );
        } else {
            self.store.delete_object(&cached)?;
            tracing::debug!(bucket = %cached.bucket, id = ?cached.id, "Removed unsynced document");
        }
        Ok(())
    }

    /// Partial field updates need the server and are refused offline.
    pub fn update_fields(&self, _doc: &LocalDocument, _fields: Map<String, Value>) -> Result<()> {
        Err(Error::NotSupported("partial field update"))
    }

    fn insert(&self, doc: &mut LocalDocument) -> Result<()> {
        if doc.acl.is_none() {
            doc.acl = Some(Acl::for_new_document(&self.session));
        }
        doc.id = Some(new_document_id());
        doc.sync_state = SyncState::Dirty;

        self.store.insert_object(doc, SyncState::Dirty)?;
        tracing::debug!(bucket = %doc.bucket, id = ?doc.id, "Inserted document offline");
        Ok(())
    }

    fn load_cached(&self, doc: &LocalDocument) -> Result<LocalDocument> {
        let id = doc.id.clone().unwrap_or_default();
        match self.store.find_object(&doc.bucket, &id)? {
            Some(cached) if !cached.deleted => Ok(cached),
            _ => Err(Error::NotFound {
                bucket: doc.bucket.clone(),
                id,
            }),
        }
    }

    /// ACL changes need Admin; everything else needs `permission`.
    ///
    /// A cached document without an ACL restricts nothing but cannot have one
    /// attached offline.
    fn authorize(
        &self,
        intended_acl: Option<&Acl>,
        cached: &LocalDocument,
        permission: Permission,
    ) -> Result<()> {
        let changes_acl = intended_acl.is_some_and(|acl| cached.acl.as_ref() != Some(acl));
        if changes_acl {
            return match &cached.acl {
                Some(acl) if acl.allows(&self.session, Permission::Admin) => Ok(()),
                _ => Err(Error::Forbidden {
                    permission: Permission::Admin.as_str(),
                }),
            };
        }

        match &cached.acl {
            Some(acl) if !acl.allows(&self.session, permission) => Err(Error::Forbidden {
                permission: permission.as_str(),
            }),
            _ => Ok(()),
        }
    }
}

fn check_etag(doc: &LocalDocument, cached: &LocalDocument) -> Result<()> {
    match (&doc.etag, &cached.etag) {
        (Some(mine), Some(theirs)) if mine != theirs => Err(Error::Conflict {
            id: cached.id.clone().unwrap_or_default(),
            reason: crate::ConflictReason::EtagMismatch,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BatchOperation, ConflictReason, MemoryReplicaStore, OpKind, PUBLIC};
    use serde_json::json;
    use std::time::Duration;

    fn gatekeeper(session: Session) -> OfflineGatekeeper<MemoryReplicaStore> {
        OfflineGatekeeper::new(
            Arc::new(MemoryReplicaStore::new()),
            SyncCoordinator::new_shared(),
            session,
        )
    }

    /// Store a document as if it had been pushed and acknowledged.
    fn seed_synced(store: &MemoryReplicaStore, acl: Option<Acl>) -> LocalDocument {
        let mut doc = LocalDocument::new("notes")
            .with_id("n1")
            .with_etag("e1")
            .with_field("title", json!("original"));
        doc.acl = acl;
        store.insert_object(&doc, SyncState::Sync).unwrap();
        store.find_object("notes", "n1").unwrap().unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_id_and_owner_acl() {
        let gk = gatekeeper(Session::user("u1"));
        let mut doc = LocalDocument::new("notes").with_field("title", json!("hi"));
        gk.save(&mut doc).await.unwrap();

        let id = doc.id.clone().unwrap();
        let stored = gk.find("notes", &id).unwrap().unwrap();
        assert_eq!(stored.acl, Some(Acl::owned_by("u1")));
        assert!(stored.is_dirty());
        assert_eq!(stored.get("title"), Some(&json!("hi")));
    }

    #[tokio::test]
    async fn anonymous_insert_opens_read_write() {
        let gk = gatekeeper(Session::anonymous());
        let mut doc = LocalDocument::new("notes");
        gk.save(&mut doc).await.unwrap();
        assert_eq!(doc.acl, Some(Acl::public_read_write()));
    }

    #[tokio::test]
    async fn insert_keeps_caller_acl() {
        let gk = gatekeeper(Session::user("u1"));
        let mut acl = Acl::default();
        acl.grant(Permission::Read, PUBLIC);
        let mut doc = LocalDocument::new("notes").with_acl(acl.clone());
        gk.save(&mut doc).await.unwrap();
        assert_eq!(doc.acl, Some(acl));
    }

    #[tokio::test]
    async fn update_missing_document_is_not_found() {
        let gk = gatekeeper(Session::user("u1"));
        let mut doc = LocalDocument::new("notes").with_id("ghost");
        let result = gk.save(&mut doc).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert!(!gk.coordinator.is_crud_busy());
    }

    #[tokio::test]
    async fn update_with_stale_etag_conflicts() {
        let gk = gatekeeper(Session::user("u1"));
        let cached = seed_synced(&gk.store, None);

        let mut doc = cached.with_etag("stale");
        let result = gk.save(&mut doc).await;
        assert!(matches!(
            result,
            Err(Error::Conflict {
                reason: ConflictReason::EtagMismatch,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn update_without_etag_is_accepted() {
        let gk = gatekeeper(Session::user("u1"));
        let cached = seed_synced(&gk.store, Some(Acl::owned_by("u1")));

        let mut doc = cached.clone();
        doc.etag = None;
        doc.set("title", json!("edited"));
        gk.save(&mut doc).await.unwrap();

        let stored = gk.store.find_object("notes", "n1").unwrap().unwrap();
        assert_eq!(stored.etag.as_deref(), Some("e1"));
        assert_eq!(stored.get("title"), Some(&json!("edited")));
        assert!(stored.is_dirty());
        assert_eq!(doc, stored);
    }

    #[tokio::test]
    async fn update_requires_write_permission() {
        let gk = gatekeeper(Session::user("intruder"));
        let cached = seed_synced(&gk.store, Some(Acl::owned_by("u1")));

        let mut doc = cached.with_field("title", json!("hijacked"));
        let result = gk.save(&mut doc).await;
        assert!(matches!(result, Err(Error::Forbidden { permission: "write" })));
    }

    #[tokio::test]
    async fn acl_change_requires_admin() {
        let mut acl = Acl::default();
        acl.grant(Permission::Write, "u2");
        let gk = gatekeeper(Session::user("u2"));
        let cached = seed_synced(&gk.store, Some(acl.clone()));

        // Plain write is fine
        let mut doc = cached.clone().with_field("title", json!("ok"));
        gk.save(&mut doc).await.unwrap();

        // Changing the ACL is not
        let mut widened = acl.clone();
        widened.grant(Permission::Write, PUBLIC);
        let mut doc = cached.clone().with_acl(widened.clone());
        let result = gk.save(&mut doc).await;
        assert!(matches!(result, Err(Error::Forbidden { permission: "admin" })));

        // Admin may
        let mut admin_acl = acl;
        admin_acl.grant(Permission::Admin, "u2");
        gk.store
            .update_object(&cached.clone().with_acl(admin_acl), SyncState::Sync)
            .unwrap();
        let mut doc = cached.with_acl(widened);
        gk.save(&mut doc).await.unwrap();
    }

    #[tokio::test]
    async fn acl_change_without_cached_acl_is_forbidden() {
        let gk = gatekeeper(Session::user("u1"));
        let cached = seed_synced(&gk.store, None);

        let mut doc = cached.clone().with_field("title", json!("free"));
        gk.save(&mut doc).await.unwrap();

        let mut doc = cached.with_acl(Acl::owned_by("u1"));
        let result = gk.save(&mut doc).await;
        assert!(matches!(result, Err(Error::Forbidden { permission: "admin" })));
    }

    #[tokio::test]
    async fn delete_synced_document_leaves_tombstone() {
        let gk = gatekeeper(Session::user("u1"));
        let cached = seed_synced(&gk.store, Some(Acl::owned_by("u1")));

        gk.delete(&cached).await.unwrap();

        let stored = gk.store.find_object("notes", "n1").unwrap().unwrap();
        assert!(stored.deleted);
        assert!(stored.is_dirty());
        assert!(gk.find("notes", "n1").unwrap().is_none());

        // A second delete finds nothing live
        let result = gk.delete(&cached).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn delete_unsynced_document_removes_it() {
        let gk = gatekeeper(Session::user("u1"));
        let mut doc = LocalDocument::new("notes");
        gk.save(&mut doc).await.unwrap();

        gk.delete(&doc).await.unwrap();
        let id = doc.id.unwrap();
        assert!(gk.store.find_object("notes", &id).unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_acknowledged_document_without_etag_leaves_tombstone() {
        let gk = gatekeeper(Session::user("u1"));
        let mut doc = LocalDocument::new("notes").with_id("n1");
        doc.adopt_ack(Some("n1"), None, None);
        gk.store.insert_object(&doc, SyncState::Sync).unwrap();

        gk.delete(&doc).await.unwrap();

        let stored = gk.store.find_object("notes", "n1").unwrap().unwrap();
        assert!(stored.deleted);
        assert!(stored.is_dirty());
    }

    #[tokio::test]
    async fn save_keeps_acknowledgement_from_cache() {
        let gk = gatekeeper(Session::user("u1"));
        let mut cached = LocalDocument::new("notes").with_id("n1");
        cached.adopt_ack(Some("n1"), None, None);
        gk.store.insert_object(&cached, SyncState::Sync).unwrap();

        let mut edit = LocalDocument::new("notes")
            .with_id("n1")
            .with_field("title", json!("edited"));
        gk.save(&mut edit).await.unwrap();

        let stored = gk.store.find_object("notes", "n1").unwrap().unwrap();
        assert!(stored.acknowledged);
        assert_eq!(BatchOperation::for_document(&stored).unwrap().kind(), OpKind::Update);
    }

    #[tokio::test]
    async fn delete_requires_delete_permission() {
        let mut acl = Acl::default();
        acl.grant(Permission::Write, PUBLIC);
        let gk = gatekeeper(Session::user("u2"));
        let cached = seed_synced(&gk.store, Some(acl));

        let result = gk.delete(&cached).await;
        assert!(matches!(result, Err(Error::Forbidden { permission: "delete" })));
    }

    #[tokio::test]
    async fn delete_unsaved_document_is_invalid() {
        let gk = gatekeeper(Session::user("u1"));
        let result = gk.delete(&LocalDocument::new("notes")).await;
        assert!(matches!(result, Err(Error::InvalidDocument(_))));
    }

    #[tokio::test]
    async fn update_and_delete_fail_fast_during_sync_but_insert_succeeds() {
        let gk = gatekeeper(Session::user("u1"));
        let cached = seed_synced(&gk.store, Some(Acl::owned_by("u1")));
        let _round = gk.coordinator.start_sync().unwrap();

        let mut doc = cached.clone().with_field("title", json!("x"));
        let update = tokio::time::timeout(Duration::from_millis(100), gk.save(&mut doc))
            .await
            .unwrap();
        assert!(matches!(update, Err(Error::Locked)));

        let delete = tokio::time::timeout(Duration::from_millis(100), gk.delete(&cached))
            .await
            .unwrap();
        assert!(matches!(delete, Err(Error::Locked)));

        let mut fresh = LocalDocument::new("notes");
        gk.save(&mut fresh).await.unwrap();
        assert!(fresh.id.is_some());
    }

    #[tokio::test]
    async fn update_waits_for_other_mutation() {
        let gk = Arc::new(gatekeeper(Session::user("u1")));
        let cached = seed_synced(&gk.store, Some(Acl::owned_by("u1")));
        let busy = gk.coordinator.enter_crud_section().await.unwrap();

        let task = {
            let gk = Arc::clone(&gk);
            let mut doc = cached.with_field("title", json!("after wait"));
            tokio::spawn(async move { gk.save(&mut doc).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        drop(busy);

        task.await.unwrap().unwrap();
        let stored = gk.store.find_object("notes", "n1").unwrap().unwrap();
        assert_eq!(stored.get("title"), Some(&json!("after wait")));
    }

    #[test]
    fn partial_update_not_supported() {
        let gk = gatekeeper(Session::user("u1"));
        let result = gk.update_fields(&LocalDocument::new("notes").with_id("n1"), Map::new());
        assert!(matches!(result, Err(Error::NotSupported(_))));
    }
}
