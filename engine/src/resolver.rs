//! Conflict resolution strategies.
//!
//! When the remote store rejects a pushed write as conflicting and echoes its
//! own copy of the document, a [`ConflictResolver`] decides what the local
//! replica keeps. The caller picks the strategy per push round.

use crate::{LocalDocument, SyncState};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// What the local replica should now hold
    pub document: LocalDocument,
    /// Whether the client's intended write was left unapplied
    pub is_failure: bool,
}

/// Reconciles a local document with the server's echoed copy.
pub trait ConflictResolver: Send + Sync {
    /// Resolve a conflict between `local` and the server's `echo`.
    fn resolve(&self, local: &LocalDocument, echo: &Value) -> Resolution;
}

/// The server's copy wins. Never reported as a failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreferServer;

impl ConflictResolver for PreferServer {
    fn resolve(&self, local: &LocalDocument, echo: &Value) -> Resolution {
        let mut document = local.clone();
        match document.overwrite_from_server(echo) {
            Ok(()) => {
                document.sync_state = SyncState::Sync;
                Resolution {
                    document,
                    is_failure: false,
                }
            }
            Err(e) => {
                tracing::warn!(
                    id = ?local.id,
                    error = %e,
                    "Unusable server echo, keeping local copy"
                );
                Resolution {
                    document: local.clone(),
                    is_failure: true,
                }
            }
        }
    }
}

/// The local copy wins for the next attempt.
///
/// Only the server etag is adopted, so the retry does not conflict again on
/// a stale version. The write did not land this round, so it is a failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreferClient;

impl ConflictResolver for PreferClient {
    fn resolve(&self, local: &LocalDocument, echo: &Value) -> Resolution {
        let mut document = local.clone();
        if let Some(etag) = echo.get("etag").and_then(Value::as_str) {
            document.etag = Some(etag.to_string());
        }
        // The server holds this id, the retry goes out as an update
        document.acknowledged = true;
        document.sync_state = SyncState::Dirty;
        Resolution {
            document,
            is_failure: true,
        }
    }
}

/// Configuration-friendly choice between the two strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolveStrategy {
    /// Server copy wins (default)
    #[default]
    PreferServer,
    /// Local copy is retried with the server etag
    PreferClient,
}

impl ConflictResolver for ResolveStrategy {
    fn resolve(&self, local: &LocalDocument, echo: &Value) -> Resolution {
        match self {
            ResolveStrategy::PreferServer => PreferServer.resolve(local, echo),
            ResolveStrategy::PreferClient => PreferClient.resolve(local, echo),
        }
    }
}
