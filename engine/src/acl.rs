//! Access control lists and the caller identity they are checked against.
//!
//! An [`Acl`] names an optional owner and six permission sets. Each set holds
//! subject identifiers: a user id, [`PUBLIC`], [`AUTHENTICATED`], or a group
//! marker built with [`group_marker`]. The owner passes every check.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Subject marker matching every caller, logged in or not.
pub const PUBLIC: &str = "*";

/// Subject marker matching any logged-in caller.
pub const AUTHENTICATED: &str = "authenticated";

/// Prefix of group subject markers.
pub const GROUP_PREFIX: &str = "role:";

/// Build the subject marker for a named group.
pub fn group_marker(group: &str) -> String {
    format!("{GROUP_PREFIX}{group}")
}

/// A permission guarded by an ACL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Create,
    Update,
    Delete,
    Admin,
}

impl Permission {
    /// Lowercase name, as used in error messages and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Create => "create",
            Permission::Update => "update",
            Permission::Delete => "delete",
            Permission::Admin => "admin",
        }
    }
}

/// The identity of the caller, injected into the gatekeeper.
///
/// Read-only: the engine never logs anyone in or out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Current user id, if logged in
    pub user_id: Option<String>,
    /// Groups the current user belongs to
    pub groups: Vec<String>,
}

impl Session {
    /// A caller that is not logged in.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A logged-in caller.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            groups: Vec::new(),
        }
    }

    /// Add group membership.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Whether the caller is logged in.
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Owner plus six permission sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Acl {
    pub owner: Option<String>,
    pub read: BTreeSet<String>,
    pub write: BTreeSet<String>,
    pub create: BTreeSet<String>,
    pub update: BTreeSet<String>,
    pub delete: BTreeSet<String>,
    pub admin: BTreeSet<String>,
}

impl Acl {
    /// An ACL owned by `user_id`.
    pub fn owned_by(user_id: impl Into<String>) -> Self {
        Self {
            owner: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// An ACL with read and write opened to everyone.
    pub fn public_read_write() -> Self {
        let mut acl = Self::default();
        acl.grant(Permission::Read, PUBLIC);
        acl.grant(Permission::Write, PUBLIC);
        acl
    }

    /// Default ACL for a document created by `session`.
    pub fn for_new_document(session: &Session) -> Self {
        match &session.user_id {
            Some(user_id) => Self::owned_by(user_id.clone()),
            None => Self::public_read_write(),
        }
    }

    /// Add a subject to a permission set.
    pub fn grant(&mut self, permission: Permission, subject: impl Into<String>) {
        self.set_mut(permission).insert(subject.into());
    }

    /// Remove a subject from a permission set.
    pub fn revoke(&mut self, permission: Permission, subject: &str) {
        self.set_mut(permission).remove(subject);
    }

    /// The subjects holding a permission.
    pub fn subjects(&self, permission: Permission) -> &BTreeSet<String> {
        match permission {
            Permission::Read => &self.read,
            Permission::Write => &self.write,
            Permission::Create => &self.create,
            Permission::Update => &self.update,
            Permission::Delete => &self.delete,
            Permission::Admin => &self.admin,
        }
    }

    fn set_mut(&mut self, permission: Permission) -> &mut BTreeSet<String> {
        match permission {
            Permission::Read => &mut self.read,
            Permission::Write => &mut self.write,
            Permission::Create => &mut self.create,
            Permission::Update => &mut self.update,
            Permission::Delete => &mut self.delete,
            Permission::Admin => &mut self.admin,
        }
    }

    /// Check whether `session` holds `permission` under this ACL.
    pub fn allows(&self, session: &Session, permission: Permission) -> bool {
        if let (Some(owner), Some(user_id)) = (&self.owner, &session.user_id) {
            if owner == user_id {
                return true;
            }
        }

        let subjects = self.subjects(permission);
        if subjects.contains(PUBLIC) {
            return true;
        }
        if let Some(user_id) = &session.user_id {
            if subjects.contains(AUTHENTICATED) || subjects.contains(user_id) {
                return true;
            }
        }
        session
            .groups
            .iter()
            .any(|group| subjects.contains(&group_marker(group)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_passes_everything() {
        let acl = Acl::owned_by("u1");
        let session = Session::user("u1");
        assert!(acl.allows(&session, Permission::Admin));
        assert!(acl.allows(&session, Permission::Delete));
        assert!(!acl.allows(&Session::user("u2"), Permission::Write));
        assert!(!acl.allows(&Session::anonymous(), Permission::Read));
    }

    #[test]
    fn markers() {
        let mut acl = Acl::default();
        acl.grant(Permission::Write, AUTHENTICATED);
        acl.grant(Permission::Delete, group_marker("editors"));
        acl.grant(Permission::Read, PUBLIC);

        assert!(acl.allows(&Session::anonymous(), Permission::Read));
        assert!(!acl.allows(&Session::anonymous(), Permission::Write));
        assert!(acl.allows(&Session::user("u9"), Permission::Write));
        assert!(!acl.allows(&Session::user("u9"), Permission::Delete));
        assert!(acl.allows(
            &Session::user("u9").with_group("editors"),
            Permission::Delete
        ));
    }

    #[test]
    fn default_acl_for_new_documents() {
        let acl = Acl::for_new_document(&Session::user("u1"));
        assert_eq!(acl.owner.as_deref(), Some("u1"));
        assert!(acl.read.is_empty());

        let acl = Acl::for_new_document(&Session::anonymous());
        assert_eq!(acl.owner, None);
        assert!(acl.read.contains(PUBLIC));
        assert!(acl.write.contains(PUBLIC));
        assert!(!acl.admin.contains(PUBLIC));
    }

    #[test]
    fn revoke_removes_subject() {
        let mut acl = Acl::public_read_write();
        acl.revoke(Permission::Write, PUBLIC);
        assert!(!acl.allows(&Session::anonymous(), Permission::Write));
        assert!(acl.allows(&Session::anonymous(), Permission::Read));
    }

    #[test]
    fn json_shape() {
        let mut acl = Acl::owned_by("u1");
        acl.grant(Permission::Read, PUBLIC);
        let value = serde_json::to_value(&acl).unwrap();
        assert_eq!(value["owner"], "u1");
        assert_eq!(value["read"], serde_json::json!(["*"]));
        assert_eq!(value["admin"], serde_json::json!([]));

        let parsed: Acl = serde_json::from_value(serde_json::json!({"owner": "u1"})).unwrap();
        assert_eq!(parsed, Acl::owned_by("u1"));
    }
}
