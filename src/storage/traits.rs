//! Abstract storage traits for beacon-alerts.
//!
//! These traits define the contract that document-store backends must
//! implement. The crate ships an in-memory backend; production deployments
//! plug in a client for their replicated document database.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::document::Document;
use crate::ids::{DocId, Revision, Sequence};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Document not found.
    #[error("Document not found: {0}")]
    NotFound(DocId),

    /// The supplied revision does not match the stored one.
    #[error("Revision conflict on '{id}': expected {expected:?}, stored {actual:?}")]
    RevisionConflict {
        id: DocId,
        expected: Option<Revision>,
        actual: Option<Revision>,
    },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result of one long-poll request against the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedResponse {
    /// The poll window elapsed without new changes.
    Timeout,
    /// Raw change batch body, decoded by the consumer.
    ///
    /// Layout: `{"results": [{"seq", "id", "deleted"}], "last_seq"}`.
    Batch(Vec<u8>),
}

/// Storage trait for document operations.
///
/// # Concurrency
/// Writers must echo the revision they read. Implementations reject a write
/// whose revision is stale with `StorageError::RevisionConflict` and never
/// retry on the caller's behalf.
pub trait DocumentStore: Send + Sync {
    /// Get a document by id.
    fn get(&self, id: &DocId) -> Result<Option<Document>, StorageError>;

    /// Create or update a document.
    ///
    /// `expected` must be `None` when creating and the current revision when
    /// updating. Returns the new revision.
    fn put(&self, document: Document, expected: Option<&Revision>) -> Result<Revision, StorageError>;

    /// Delete a document at the given revision.
    fn delete(&self, id: &DocId, rev: &Revision) -> Result<(), StorageError>;

    /// Long-poll the change feed for entries after `since`.
    ///
    /// Blocks for at most `timeout` waiting for new changes.
    fn changes_since(&self, since: &Sequence, timeout: Duration) -> Result<FeedResponse, StorageError>;

    /// The sequence of the most recent change.
    fn last_sequence(&self) -> Result<Sequence, StorageError>;

    /// Ids of alert documents whose `activeOn` is absent or `<= now`.
    ///
    /// Order is the order in which the dispatcher evaluates them.
    fn list_active_alerts(&self, now: DateTime<Utc>) -> Result<Vec<DocId>, StorageError>;
}
