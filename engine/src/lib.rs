//! # Tether Engine
//!
//! The client side of offline-first replication against a remote document
//! store.
//!
//! Documents are saved into a local replica while offline and tagged Dirty.
//! When connectivity returns, a push round sends the dirty documents to the
//! server in fixed-size batch requests and reconciles every per-item result
//! back into the replica.
//!
//! ## Core Concepts
//!
//! ### Local replica
//!
//! [`ReplicaStore`] is the contract for the local database: documents keyed by
//! bucket and id, each tagged [`SyncState::Sync`] or [`SyncState::Dirty`], plus
//! a per-bucket checkpoint. [`MemoryReplicaStore`] implements it in memory and
//! can be persisted through [`ReplicaSnapshot`].
//!
//! ### Offline writes
//!
//! [`OfflineGatekeeper`] checks every local update or delete against the cached
//! copy: etag first, then the document's [`Acl`]. New documents skip the
//! checks and get an id and a default ACL.
//!
//! ### Push
//!
//! [`PushSynchronizer`] partitions the dirty set into windows and keeps one
//! window in flight while the next request is built. Each result is applied
//! according to the table in [`reconcile`]. Conflicts go to a
//! [`ConflictResolver`]:
//! - [`PreferServer`] - the server's copy wins
//! - [`PreferClient`] - local fields win, the server etag is adopted for retry
//!
//! ### Coordination
//!
//! [`SyncCoordinator`] keeps sync rounds and local mutations apart. A mutation
//! started during a sync round fails with [`Error::Locked`]; a mutation started
//! during another mutation waits.
//!
//! ## Quick Start
//!
//! ```rust
//! use serde_json::json;
//! use std::sync::Arc;
//! use tether_engine::{
//!     LocalDocument, MemoryReplicaStore, MockTransport, OfflineGatekeeper, PreferServer,
//!     PushSynchronizer, ReplicaStore, Session, SyncConfig, SyncCoordinator,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> tether_engine::Result<()> {
//! let store = Arc::new(MemoryReplicaStore::new());
//! let coordinator = SyncCoordinator::new_shared();
//!
//! // 1. Save while offline
//! let gatekeeper = OfflineGatekeeper::new(
//!     Arc::clone(&store),
//!     Arc::clone(&coordinator),
//!     Session::user("alice"),
//! );
//! let mut note = LocalDocument::new("notes").with_field("title", json!("Groceries"));
//! gatekeeper.save(&mut note).await?;
//! assert!(note.is_dirty());
//!
//! // 2. Push once back online
//! let transport = Arc::new(MockTransport::accepting());
//! let push = PushSynchronizer::new(
//!     Arc::clone(&store),
//!     transport,
//!     coordinator,
//!     SyncConfig::default(),
//! );
//! let failed = push.push("notes", PreferServer).await?;
//! assert!(failed.is_empty());
//! assert!(store.last_synced_at("notes")?.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! The engine logs through `tracing` and never installs a subscriber.

pub mod acl;
pub mod batch;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod gatekeeper;
pub mod pull;
pub mod push;
pub mod reconcile;
pub mod replica;
pub mod resolver;
pub mod snapshot;
pub mod transport;

// Re-export main types at crate root
pub use acl::{group_marker, Acl, Permission, Session, AUTHENTICATED, GROUP_PREFIX, PUBLIC};
pub use batch::{
    BatchOperation, BatchRequest, BatchResponse, BatchResult, DeleteOp, InsertOp, OpKind,
    Outcome, UpdateOp,
};
pub use config::{ConfigError, SyncConfig, DEFAULT_PULL_LIMIT, DEFAULT_PUSH_DIVIDE_NUMBER};
pub use coordinator::{CrudGuard, SyncCoordinator, SyncGuard};
pub use document::{LocalDocument, SyncState, RESERVED_KEYS};
pub use error::{ConflictReason, Error, Result};
pub use gatekeeper::OfflineGatekeeper;
pub use pull::{PullReport, PullSynchronizer};
pub use push::PushSynchronizer;
pub use reconcile::FailedItem;
pub use replica::{MemoryReplicaStore, ReplicaStore};
pub use resolver::{ConflictResolver, PreferClient, PreferServer, Resolution, ResolveStrategy};
pub use snapshot::{ReplicaSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use transport::{BatchTransport, MockTransport};

/// Type aliases for clarity
pub type BucketName = String;
pub type DocumentId = String;
pub type Etag = String;
pub type Timestamp = String;
