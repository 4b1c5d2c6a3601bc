//! Error types for the Tether engine.

use crate::{BucketName, DocumentId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the remote store (or the local gatekeeper) reported a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictReason {
    /// The caller's etag does not match the current version.
    EtagMismatch,
    /// An insert collided with an existing id.
    DuplicateId,
    /// The server sent a reason this client does not know.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConflictReason::EtagMismatch => "etag mismatch",
            ConflictReason::DuplicateId => "duplicate id",
            ConflictReason::Unknown => "unknown reason",
        };
        f.write_str(s)
    }
}

/// All possible errors from the Tether engine.
#[derive(Debug, Error)]
pub enum Error {
    // Coordination errors
    #[error("local store is locked by an active sync round")]
    Locked,

    // Document errors
    #[error("conflict on document {id}: {reason}")]
    Conflict {
        id: DocumentId,
        reason: ConflictReason,
    },

    #[error("document not found: {bucket}/{id}")]
    NotFound { bucket: BucketName, id: DocumentId },

    #[error("document already exists: {bucket}/{id}")]
    AlreadyExists { bucket: BucketName, id: DocumentId },

    #[error("permission denied: {permission} required")]
    Forbidden { permission: &'static str },

    #[error("operation not supported offline: {0}")]
    NotSupported(&'static str),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    // Remote errors
    #[error("transport error: {message}")]
    Transport {
        message: String,
        retryable: bool,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("push window task failed: {0}")]
    Task(String),
}

impl Error {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the caller may simply try again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Locked => true,
            Error::Transport { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Task(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
